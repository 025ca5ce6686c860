//! Batch commit and per-message error attribution.

use crate::netlink::{Control, Error, Filter, Message, MessageHandler, Result, Transport, dispatch};

use super::batch::Batch;
use super::session::Session;

/// A batch member the kernel rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingError {
    /// Sequence number of the rejected message.
    pub seq: u32,
    /// Positive errno.
    pub errno: i32,
}

impl PendingError {
    /// The kernel error this record stands for.
    pub fn to_error(self) -> Error {
        Error::from_errno(self.errno)
    }
}

impl std::fmt::Display for PendingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seq {}: {}",
            self.seq,
            std::io::Error::from_raw_os_error(self.errno)
        )
    }
}

/// Records every error acknowledgement and never stops early.
pub struct AckCollector<'a> {
    errors: &'a mut Vec<PendingError>,
}

impl<'a> AckCollector<'a> {
    /// Append records to `errors`.
    pub fn new(errors: &'a mut Vec<PendingError>) -> Self {
        Self { errors }
    }
}

impl MessageHandler for AckCollector<'_> {
    fn handle(&mut self, _msg: &Message<'_>) -> Result<Control> {
        Ok(Control::Continue)
    }

    fn acknowledge(&mut self, seq: u32, errno: i32) -> Result<Control> {
        if errno != 0 {
            tracing::debug!(seq, errno, "batch message rejected");
            self.errors.push(PendingError { seq, errno });
        }
        Ok(Control::Continue)
    }
}

impl<T: Transport> Session<T> {
    /// Send a batch and collect the kernel's verdict on every message.
    ///
    /// Acknowledgements already queued after the send are drained
    /// completely, so every rejected message ends up in `errors`, not just
    /// the first. Returns [`Error::BatchRejected`] if any record was added.
    /// Transport failures abort immediately.
    pub async fn commit(&mut self, batch: &Batch, errors: &mut Vec<PendingError>) -> Result<()> {
        let pages = batch.pages();
        self.grow_send_buffer(pages.len() * batch.page_size());

        if self.config.debug_netlink {
            for page in &pages {
                self.trace("send", page);
            }
        }

        let expected = batch.len();
        let sent = self.transport.send_vectored(&pages).await?;
        if sent != expected {
            return Err(Error::ShortSend { sent, expected });
        }

        let before = errors.len();
        let filter = Filter::port(self.transport.port_id());
        let mut collector = AckCollector::new(errors);
        loop {
            self.recv_buf.clear();
            self.recv_buf.reserve(super::batch::nlmsg_max_size());
            let n = match self.transport.try_recv(&mut self.recv_buf)? {
                Some(n) if n > 0 => n,
                _ => break,
            };
            self.trace("recv", &self.recv_buf[..n]);
            dispatch(&self.recv_buf[..n], filter, &mut collector)?;
        }

        let failed = errors.len() - before;
        if failed > 0 {
            return Err(Error::BatchRejected { failed });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_keeps_going() {
        let mut errors = Vec::new();
        let mut collector = AckCollector::new(&mut errors);
        assert_eq!(collector.acknowledge(1, libc::ENOENT).unwrap(), Control::Continue);
        assert_eq!(collector.acknowledge(2, 0).unwrap(), Control::Continue);
        assert_eq!(collector.acknowledge(3, libc::EEXIST).unwrap(), Control::Continue);
        assert_eq!(
            errors,
            vec![
                PendingError {
                    seq: 1,
                    errno: libc::ENOENT
                },
                PendingError {
                    seq: 3,
                    errno: libc::EEXIST
                },
            ]
        );
    }

    #[test]
    fn pending_error_display() {
        let err = PendingError {
            seq: 7,
            errno: libc::ENOENT,
        };
        assert!(err.to_string().starts_with("seq 7: "));
        assert!(err.to_error().is_not_found());
    }
}
