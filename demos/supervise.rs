use std::time::Duration;

use connection_watcher::{CommandSource, WatcherBuilder};

#[tokio::main]
async fn main() {
    // A worker that exits after two seconds, well below the health
    // threshold, so the crash-loop breaker trips after three rounds.
    let source = CommandSource::new("sh").args(["-c", "sleep 2"]);

    let watcher = WatcherBuilder::new(source, |conn| match conn {
        Some(conn) => println!("connected to worker pid {:?}", conn.id()),
        None => println!("worker died, reconnecting..."),
    })
    .with_health_threshold(Duration::from_secs(5))
    .with_max_unhealthy_streak(3)
    .build();

    watcher.start().await;

    let mut status = watcher.subscribe_status();
    let terminal = *status.wait_for(|s| s.is_terminal()).await.unwrap();
    println!("supervision ended: {terminal}");
}
