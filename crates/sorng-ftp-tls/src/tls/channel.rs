//! Record-level read/write engine.
//!
//! Reads return whatever one record receive yields, clamped to the peer's
//! maximum record size. Writes push the whole window, one record-sized
//! chunk at a time, advancing over partial sends. Transient results
//! (again, interrupted, alerts) are logged and retried; anything else ends
//! the call with `RecordIoFailure`.

use crate::tls::classify::{Classification, ErrorClassifier};
use crate::tls::error::{FtpTlsError, TlsResult};
use crate::tls::logging::{LogCategories, TlsLog};
use crate::tls::provider::ProviderSession;

pub struct RecordChannel<'a> {
    ctx: &'a mut dyn ProviderSession,
    classifier: &'a dyn ErrorClassifier,
    log: &'a TlsLog,
    max_record: usize,
}

fn check_window(len: usize, offset: usize, count: usize, what: &str) -> TlsResult<()> {
    if count == 0 {
        return Err(FtpTlsError::invalid_argument(format!("{} count must be positive", what)));
    }
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(FtpTlsError::invalid_argument(format!(
            "{} window {}+{} exceeds buffer of {} bytes",
            what, offset, count, len
        ))),
    }
}

impl<'a> RecordChannel<'a> {
    pub fn new(
        ctx: &'a mut dyn ProviderSession,
        classifier: &'a dyn ErrorClassifier,
        log: &'a TlsLog,
        max_record: usize,
    ) -> Self {
        Self {
            ctx,
            classifier,
            log,
            max_record,
        }
    }

    fn clamp(&self, n: usize) -> usize {
        if self.max_record == 0 {
            n
        } else {
            n.min(self.max_record)
        }
    }

    fn failure(&self, op: &str, code: i32) -> FtpTlsError {
        let mut msg = format!("{} failed: {}", op, self.classifier.describe(code));
        if let Some(detail) = self.ctx.last_error_detail() {
            msg.push_str(" (");
            msg.push_str(&detail);
            msg.push(')');
        }
        FtpTlsError::record_io(msg).with_code(code)
    }

    /// Log a transient result. Returns false if the result is not transient.
    fn note_transient(&self, op: &str, category: LogCategories, code: i32) -> bool {
        let class = self.classifier.classify(code);
        if !class.retry_record() {
            return false;
        }
        match class {
            Classification::WarningAlert | Classification::FatalAlert => {
                let alert = self.ctx.last_alert().unwrap_or_else(|| "unknown".to_string());
                self.log.warn(
                    LogCategories::ALERT,
                    format!(
                        "{}: {} alert received: {}",
                        op,
                        if class == Classification::FatalAlert { "fatal" } else { "warning" },
                        alert
                    ),
                );
            }
            _ => self.log.trace(
                category,
                format!("{}: {}, retrying", op, self.classifier.code_name(code)),
            ),
        }
        true
    }

    /// Receive into `buffer[offset..offset + max_count]`. Returns the number
    /// of bytes stored; zero means the peer closed the stream.
    pub fn read(&mut self, buffer: &mut [u8], offset: usize, max_count: usize) -> TlsResult<usize> {
        check_window(buffer.len(), offset, max_count, "read")?;
        let want = self.clamp(max_count);
        let window = &mut buffer[offset..offset + want];

        loop {
            let r = self.ctx.record_recv(window);
            if r >= 0 {
                self.log
                    .trace(LogCategories::READ, format!("read {} of {} bytes", r, want));
                return Ok(r as usize);
            }
            let code = r as i32;
            if !self.note_transient("read", LogCategories::READ, code) {
                return Err(self.failure("read", code));
            }
        }
    }

    /// Send all of `buffer[offset..offset + count]`.
    pub fn write(&mut self, buffer: &[u8], offset: usize, count: usize) -> TlsResult<()> {
        check_window(buffer.len(), offset, count, "write")?;
        let end = offset + count;
        let mut pos = offset;

        while pos < end {
            let chunk = self.clamp(end - pos);
            let r = self.ctx.record_send(&buffer[pos..pos + chunk]);
            if r > 0 {
                pos += r as usize;
                self.log.trace(
                    LogCategories::WRITE,
                    format!("wrote {} bytes, {} remaining", r, end - pos),
                );
                continue;
            }
            let code = r as i32;
            if r == 0 {
                return Err(FtpTlsError::record_io(format!(
                    "write made no progress with {} bytes remaining",
                    end - pos
                )));
            }
            if !self.note_transient("write", LogCategories::WRITE, code) {
                return Err(self.failure("write", code));
            }
        }
        Ok(())
    }

    /// Read and discard whatever plaintext is already buffered.
    pub fn drain_pending(&mut self) -> TlsResult<usize> {
        let pending = self.ctx.record_check_pending();
        if pending == 0 {
            return Ok(0);
        }
        let mut scratch = vec![0u8; self.clamp(pending)];
        let mut drained = 0;
        while drained < pending {
            let n = (pending - drained).min(scratch.len());
            let got = self.read(&mut scratch, 0, n)?;
            if got == 0 {
                break;
            }
            drained += got;
        }
        self.log.debug(
            LogCategories::READ,
            format!("discarded {} pending bytes", drained),
        );
        Ok(drained)
    }
}
