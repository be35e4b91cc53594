#[tokio::main]
async fn main() {
  playerctl_presence::run().await
}
