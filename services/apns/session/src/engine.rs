//! Batch send loop with asynchronous error-frame detection.
//!
//! The gateway never acknowledges a notification. It answers only on failure, with
//! an error frame carrying the identifier of the offending notification, and then
//! closes the connection. Because the answer can arrive while later notifications
//! are still being written, every write is preceded by a readiness wait, and a
//! readable socket always takes precedence over a writable one.

use crate::error::{translate_status, ApnError};
use crate::logging::ClientLog;
use crate::transport::{Readiness, Transport};
use apns_wire::{ErrorFrame, NotificationFrame, ERROR_FRAME_SIZE};
use std::time::Duration;

/// Where and why a batch stopped
#[derive(Debug)]
pub(crate) struct BatchFailure {
    pub error: ApnError,
    /// Token index the failure applies to. For gateway errors this is the
    /// identifier echoed by the error frame.
    pub index: usize,
}

impl BatchFailure {
    fn at(index: usize) -> impl FnOnce(ApnError) -> BatchFailure {
        move |error| BatchFailure { error, index }
    }
}

/// Whether a readiness wait gives up once its timeout expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitMode {
    /// Keep waiting across timeouts until something is ready
    UntilReady,
    /// Return `None` after a single timeout
    Once,
}

/// Wait for readiness, logging each expiry
pub(crate) async fn wait_ready<T: Transport + ?Sized>(
    transport: &mut T,
    interest: Readiness,
    timeout: Duration,
    mode: WaitMode,
    log: &ClientLog,
) -> Result<Option<Readiness>, ApnError> {
    loop {
        match transport.wait(interest, timeout).await {
            Ok(Some(ready)) => {
                log.debug(format_args!("select(): {:?}", ready));
                return Ok(Some(ready));
            }
            Ok(None) => {
                log.debug(format_args!("select(): timed out after {:?}", timeout));
                if mode == WaitMode::Once {
                    return Ok(None);
                }
            }
            Err(e) => {
                log.error(format_args!("select() failed: {}", e));
                return Err(e);
            }
        }
    }
}

/// Read one frame's worth of bytes from a readable socket.
///
/// Returns the error frame when the gateway sent one. Anything that is not an
/// error frame is discarded.
pub(crate) async fn read_error_frame<T: Transport + ?Sized>(
    transport: &mut T,
    log: &ClientLog,
) -> Result<Option<ErrorFrame>, ApnError> {
    let mut buf = [0u8; ERROR_FRAME_SIZE];
    if let Err(e) = transport.read_exact(&mut buf).await {
        log.error(format_args!("Could not read gateway response: {}", e));
        return Err(e);
    }

    let frame = ErrorFrame::decode(&buf)?;
    match &frame {
        Some(frame) => log.debug(format_args!(
            "Error frame received: status {}, identifier {}",
            frame.status, frame.identifier
        )),
        None => log.debug(format_args!(
            "Ignoring unexpected response with command {}",
            buf[0]
        )),
    }
    Ok(frame)
}

fn failure_from_frame(frame: ErrorFrame) -> BatchFailure {
    BatchFailure {
        error: translate_status(frame.status).unwrap_or(ApnError::Unknown(frame.status)),
        index: frame.identifier as usize,
    }
}

/// Give the gateway `wait` to report an error about notifications already written.
///
/// Transport failures are attributed to `index`.
async fn check_late_error<T: Transport + ?Sized>(
    transport: &mut T,
    wait: Duration,
    index: usize,
    log: &ClientLog,
) -> Result<(), BatchFailure> {
    let ready = wait_ready(transport, Readiness::READABLE, wait, WaitMode::Once, log)
        .await
        .map_err(BatchFailure::at(index))?;

    if ready.is_some() {
        if let Some(error_frame) = read_error_frame(transport, log)
            .await
            .map_err(BatchFailure::at(index))?
        {
            return Err(failure_from_frame(error_frame));
        }
    }
    Ok(())
}

/// Send `frame` to `tokens[start..]`, one notification per token.
///
/// Each notification is stamped with its token index as identifier. After the last
/// write the socket is watched for `trailing` so an error about the final
/// notifications is not missed. The same check runs before a malformed token is
/// reported, so a gateway error about an earlier token takes precedence.
pub(crate) async fn send_batch<T, S>(
    transport: &mut T,
    frame: &mut NotificationFrame,
    tokens: &[S],
    start: usize,
    per_token: Duration,
    trailing: Duration,
    log: &ClientLog,
) -> Result<(), BatchFailure>
where
    T: Transport + ?Sized,
    S: AsRef<str>,
{
    let mut written = false;
    for (index, token) in tokens.iter().enumerate().skip(start) {
        let token = token.as_ref();
        let identifier = u32::try_from(index)
            .map_err(|_| ApnError::TooManyTokens(tokens.len()))
            .map_err(BatchFailure::at(index))?;

        frame.set_identifier(identifier);
        if let Err(e) = frame.set_token_hex(token) {
            log.error(format_args!("Invalid device token {:?}: {}", token, e));
            if written {
                check_late_error(transport, trailing, index, log).await?;
            }
            return Err(BatchFailure {
                error: ApnError::InvalidTokenFormat(e),
                index,
            });
        }

        log.info(format_args!(
            "Sending notification to device with token {}...",
            token
        ));

        loop {
            let ready = wait_ready(
                transport,
                Readiness::READABLE | Readiness::WRITABLE,
                per_token,
                WaitMode::UntilReady,
                log,
            )
            .await
            .map_err(BatchFailure::at(index))?
            .unwrap_or(Readiness::empty());

            if ready.contains(Readiness::READABLE) {
                if let Some(error_frame) = read_error_frame(transport, log)
                    .await
                    .map_err(BatchFailure::at(index))?
                {
                    return Err(failure_from_frame(error_frame));
                }
            }

            if ready.contains(Readiness::WRITABLE) {
                if let Err(e) = transport.write_all(frame.as_bytes()).await {
                    log.error(format_args!("Could not send notification: {}", e));
                    return Err(BatchFailure { error: e, index });
                }
                log.info(format_args!(
                    "Notification has been sent to device with token {}",
                    token
                ));
                written = true;
                break;
            }
        }
    }

    check_late_error(transport, trailing, tokens.len(), log).await
}
