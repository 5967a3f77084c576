//! In-process transport pair.
//!
//! Two connected ends with the same blocking contract as the WebSocket
//! transport. Used by the simulated bridge and by tests.

use super::{CloseSignal, Transport, TransportError};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// One end of an in-process connection.
pub struct MemoryTransport {
    outbound: Mutex<Option<Sender<String>>>,
    inbound: Receiver<String>,
    close: CloseSignal,
}

impl MemoryTransport {
    /// Create two connected ends.
    ///
    /// Closing either end makes the other end's `receive()` fail with
    /// [`TransportError::Closed`] once it has drained what was already sent.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();

        let a = MemoryTransport {
            outbound: Mutex::new(Some(a_tx)),
            inbound: b_rx,
            close: CloseSignal::new(),
        };
        let b = MemoryTransport {
            outbound: Mutex::new(Some(b_tx)),
            inbound: a_rx,
            close: CloseSignal::new(),
        };
        (a, b)
    }

    /// Wait up to `timeout` for a message. `Ok(None)` if nothing arrived.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Option<String>, TransportError> {
        if self.close.is_fired() {
            return Err(TransportError::Closed);
        }
        select! {
            recv(self.inbound) -> message => message.map(Some).map_err(|_| TransportError::Closed),
            recv(self.close.receiver()) -> _ => Err(TransportError::Closed),
            default(timeout) => Ok(None),
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: &str) -> Result<(), TransportError> {
        if self.close.is_fired() {
            return Err(TransportError::Closed);
        }
        let outbound = self
            .outbound
            .lock()
            .map_err(|_| TransportError::Send("outbound lock poisoned".to_string()))?;
        match outbound.as_ref() {
            Some(sender) => sender
                .send(message.to_string())
                .map_err(|_| TransportError::Send("peer disconnected".to_string())),
            None => Err(TransportError::Closed),
        }
    }

    fn receive(&self) -> Result<String, TransportError> {
        if self.close.is_fired() {
            return Err(TransportError::Closed);
        }
        select! {
            recv(self.inbound) -> message => message.map_err(|_| TransportError::Closed),
            recv(self.close.receiver()) -> _ => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if self.close.fire() {
            if let Ok(mut outbound) = self.outbound.lock() {
                outbound.take();
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.close.is_fired()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_pair_delivers_in_order() {
        let (client, bridge) = MemoryTransport::pair();
        client.send("one").unwrap();
        client.send("two").unwrap();
        assert_eq!(bridge.receive().unwrap(), "one");
        assert_eq!(bridge.receive().unwrap(), "two");

        bridge.send("reply").unwrap();
        assert_eq!(client.receive().unwrap(), "reply");
    }

    #[test]
    fn test_close_unblocks_pending_receive() {
        let (client, _bridge) = MemoryTransport::pair();
        let client = Arc::new(client);

        let waiter = {
            let client = client.clone();
            thread::spawn(move || client.receive())
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        client.close();

        let result = waiter.join().unwrap();
        assert_eq!(result, Err(TransportError::Closed));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_send() {
        let (client, _bridge) = MemoryTransport::pair();
        client.close();
        client.close();
        assert!(client.is_closed());
        assert_eq!(client.send("late"), Err(TransportError::Closed));
        assert_eq!(client.receive(), Err(TransportError::Closed));
    }

    #[test]
    fn test_receive_timeout() {
        let (client, bridge) = MemoryTransport::pair();
        assert_eq!(bridge.receive_timeout(Duration::from_millis(10)), Ok(None));

        client.send("ping").unwrap();
        assert_eq!(
            bridge.receive_timeout(Duration::from_millis(10)),
            Ok(Some("ping".to_string()))
        );

        client.close();
        assert_eq!(
            bridge.receive_timeout(Duration::from_secs(5)),
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn test_peer_close_reaches_other_end() {
        let (client, bridge) = MemoryTransport::pair();
        bridge.send("last words").unwrap();
        bridge.close();

        assert_eq!(client.receive().unwrap(), "last words");
        assert_eq!(client.receive(), Err(TransportError::Closed));
    }
}
