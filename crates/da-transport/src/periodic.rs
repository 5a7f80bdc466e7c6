//! Named background ticker — the one threading primitive every driver-level
//! timer (PL stubborn-send, PL ack-flush, URB refill, LA round-check) is
//! built from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Spawns a named thread that calls `tick` every `interval` until `running`
/// goes false. Checks `running` between sleeps so shutdown latency is
/// bounded by `interval`, not by however long `tick` happens to take.
pub fn spawn_periodic(
    name: impl Into<String>,
    interval: Duration,
    running: Arc<AtomicBool>,
    mut tick: impl FnMut() + Send + 'static,
) -> JoinHandle<()> {
    let name = name.into();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                tick();
                std::thread::sleep(interval);
            }
            tracing::debug!(thread = %name, "periodic task stopped");
        })
        .expect("failed to spawn periodic task thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn ticks_until_stopped() {
        let running = Arc::new(AtomicBool::new(true));
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let handle = spawn_periodic("test-ticker", Duration::from_millis(5), running.clone(), move || {
            count2.fetch_add(1, Ordering::Relaxed);
        });
        std::thread::sleep(Duration::from_millis(40));
        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(count.load(Ordering::Relaxed) >= 2);
    }
}
