#![allow(dead_code)]

use posix_mq::{utils, MqError, PosixMq, QueueConfig};

/// Whether this environment lets us create message queues at all.
///
/// Containers and sandboxes frequently lack mqueue support or cap
/// RLIMIT_MSGQUEUE; tests skip instead of failing there.
pub fn mq_available() -> bool {
    let name = utils::unique_queue_name("pmq_probe");
    let probe = PosixMq::new();
    match probe.open(&QueueConfig::new(&name).create(true).maxmsgs(1).msgsize(1)) {
        Ok(()) => {
            let _ = probe.unlink();
            let _ = probe.close();
            true
        }
        Err(e) => {
            eprintln!("Skipping POSIX message queue test: {}", e);
            false
        }
    }
}

/// Create a fresh queue and return the handle with its name
pub fn create_queue(prefix: &str, maxmsgs: usize, msgsize: usize) -> (PosixMq, String) {
    let name = utils::unique_queue_name(prefix);
    let mq = PosixMq::new();
    mq.open(
        &QueueConfig::new(&name)
            .create(true)
            .exclusive(true)
            .maxmsgs(maxmsgs)
            .msgsize(msgsize),
    )
    .expect("create queue");
    (mq, name)
}

/// Best-effort removal for tests that fail midway
pub fn cleanup(name: &str) {
    match posix_mq::unlink(name) {
        Ok(()) | Err(MqError::NotFound(_)) => {}
        Err(e) => eprintln!("Failed to clean up {}: {}", name, e),
    }
}
