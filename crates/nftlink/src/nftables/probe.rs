//! Kernel capability probe for batched transactions.

use crate::netlink::message::NLM_F_ACK;
use crate::netlink::{AckOnly, Control, Filter, Result, Transport, dispatch};

use super::batch::nlmsg_max_size;
use super::frame::{batch_marker, build_header};
use super::session::Session;
use super::types::{Family, NFNL_MSG_BATCH_BEGIN, NFNL_MSG_BATCH_END, NftMsg};

/// Errno a batch-capable kernel answers the probe's nameless set with.
///
/// Kernels without batch support reject the begin marker itself, which
/// shows up as some other error (or an unexpected sequence number).
pub const PROBE_SUPPORTED_ERRNO: i32 = libc::EINVAL;

impl<T: Transport> Session<T> {
    /// Check whether the kernel accepts batched nf_tables transactions.
    ///
    /// Sends a batch holding a single malformed set creation and looks at
    /// the reply: a batch-aware kernel gets as far as validating the set
    /// and rejects it with [`PROBE_SUPPORTED_ERRNO`]. Nothing is changed
    /// either way. Only a failed send is reported as an error.
    pub async fn batch_supported(&mut self) -> Result<bool> {
        let begin = self.next_seq();
        let probe = self.next_seq();
        let end = self.next_seq();

        let mut request = batch_marker(NFNL_MSG_BATCH_BEGIN, begin);
        request.extend(build_header(NftMsg::NewSet, Family::Ip, NLM_F_ACK, probe).finish());
        request.extend(batch_marker(NFNL_MSG_BATCH_END, end));

        self.trace("send", &request);
        self.transport.send(&request).await?;

        let filter = Filter::new(probe, self.transport.port_id());
        loop {
            self.recv_buf.clear();
            self.recv_buf.reserve(nlmsg_max_size());
            let n = match self.transport.try_recv(&mut self.recv_buf)? {
                Some(n) if n > 0 => n,
                _ => return Ok(false),
            };
            self.trace("recv", &self.recv_buf[..n]);
            match dispatch(&self.recv_buf[..n], filter, &mut AckOnly) {
                Ok(Control::Continue) => continue,
                Ok(Control::Stop) => return Ok(false),
                Err(e) => {
                    tracing::debug!(error = %e, "batch probe answered");
                    return Ok(e.errno() == Some(PROBE_SUPPORTED_ERRNO));
                }
            }
        }
    }
}
