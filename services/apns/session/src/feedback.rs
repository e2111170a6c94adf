//! Feedback service reader.

use crate::engine::{wait_ready, WaitMode};
use crate::error::ApnError;
use crate::logging::ClientLog;
use crate::transport::{Readiness, Transport};
use apns_wire::{FeedbackFrame, FEEDBACK_FRAME_SIZE};
use std::time::Duration;

/// Read at most one feedback record.
///
/// Returns an empty list when nothing arrives within `timeout`, or when the
/// service has closed the connection between records (it does so once every
/// pending record has been delivered).
pub(crate) async fn read_feedback<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
    log: &ClientLog,
) -> Result<Vec<String>, ApnError> {
    let mut tokens = Vec::new();

    if wait_ready(transport, Readiness::READABLE, timeout, WaitMode::Once, log)
        .await?
        .is_none()
    {
        log.info(format_args!("No feedback received within {:?}", timeout));
        return Ok(tokens);
    }

    let mut buf = [0u8; FEEDBACK_FRAME_SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        match transport.read(&mut buf[filled..]).await {
            Ok(n) => filled += n,
            Err(ApnError::ConnectionClosed) if filled == 0 => {
                log.info(format_args!("Feedback service closed the connection"));
                return Ok(tokens);
            }
            Err(e) => {
                log.error(format_args!("Could not read feedback: {}", e));
                return Err(e);
            }
        }
    }

    let frame = FeedbackFrame::decode(&buf)?;
    let token = frame.token_hex();
    log.info(format_args!(
        "Feedback: token {} invalid since {}",
        token, frame.timestamp
    ));
    tokens.push(token);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ConnectionScript, ScriptedTransport};
    use apns_wire::DeviceToken;

    fn record(byte: u8, timestamp: u32) -> FeedbackFrame {
        FeedbackFrame {
            timestamp,
            token_len: 32,
            token: DeviceToken::from_bytes([byte; 32]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_one_record_per_call() {
        let script = ConnectionScript::feedback(vec![record(0xab, 1), record(0xcd, 2)]);
        let mut transport = ScriptedTransport::new(script);
        let log = ClientLog::default();

        let first = read_feedback(&mut transport, Duration::from_secs(3), &log)
            .await
            .unwrap();
        assert_eq!(first, vec!["ab".repeat(32)]);

        let second = read_feedback(&mut transport, Duration::from_secs(3), &log)
            .await
            .unwrap();
        assert_eq!(second, vec!["cd".repeat(32)]);

        let third = read_feedback(&mut transport, Duration::from_secs(3), &log)
            .await
            .unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamp_not_reflected() {
        let mut a = ScriptedTransport::new(ConnectionScript::feedback(vec![record(0x01, 0)]));
        let mut b = ScriptedTransport::new(ConnectionScript::feedback(vec![record(
            0x01,
            u32::MAX,
        )]));
        let log = ClientLog::default();

        let a = read_feedback(&mut a, Duration::from_secs(3), &log).await.unwrap();
        let b = read_feedback(&mut b, Duration::from_secs(3), &log).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_after_records_yields_empty() {
        let script = ConnectionScript::feedback(vec![record(0x11, 5)]).close_when_drained();
        let mut transport = ScriptedTransport::new(script);
        let log = ClientLog::default();

        assert_eq!(
            read_feedback(&mut transport, Duration::from_secs(3), &log)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(read_feedback(&mut transport, Duration::from_secs(3), &log)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_record_is_an_error() {
        let mut raw = record(0x22, 9).encode().to_vec();
        raw.truncate(20);
        let script = ConnectionScript::accept_all().with_noise(&raw).close_when_drained();
        let mut transport = ScriptedTransport::new(script);
        let log = ClientLog::default();

        let result = read_feedback(&mut transport, Duration::from_secs(3), &log).await;
        assert!(matches!(result, Err(ApnError::ConnectionClosed)));
    }
}
