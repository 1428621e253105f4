//! Bounded, cancellable writes

use std::time::Duration;

use geyser_core::SubscribeRequest;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::transport::StreamHandle;

/// Bounds applied to a single write
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Maximum time the transport may take to accept the write
    pub timeout: Duration,
    /// Cancelled when the owning session ends
    pub cancel: CancellationToken,
}

/// Write `request` to `stream`
///
/// Resolves once the transport accepted the request. Fails with
/// [`ClientError::Aborted`] if `options.cancel` fires first, with
/// [`ClientError::RequestTimeout`] if the write outlives `options.timeout`,
/// and with [`ClientError::RequestWriteFailed`] if the transport rejects it.
pub async fn send(
    stream: &dyn StreamHandle,
    request: SubscribeRequest,
    options: &SendOptions,
) -> Result<()> {
    let outcome = tokio::select! {
        biased;
        _ = options.cancel.cancelled() => return Err(ClientError::Aborted),
        outcome = tokio::time::timeout(options.timeout, stream.write(&request)) => outcome,
    };

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ClientError::RequestWriteFailed {
            request: Box::new(request),
            source,
        }),
        Err(_) => Err(ClientError::RequestTimeout {
            request: Box::new(request),
        }),
    }
}

/// Write a ping carrying `id`
pub async fn ping(stream: &dyn StreamHandle, id: u32, options: &SendOptions) -> Result<()> {
    send(stream, SubscribeRequest::ping(id), options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;

    enum Behavior {
        Accept,
        Reject,
        Stall,
    }

    struct TestHandle(Behavior);

    #[async_trait]
    impl StreamHandle for TestHandle {
        async fn write(&self, _request: &SubscribeRequest) -> std::result::Result<(), TransportError> {
            match self.0 {
                Behavior::Accept => Ok(()),
                Behavior::Reject => Err(TransportError::WriteFailed("broken pipe".into())),
                Behavior::Stall => std::future::pending().await,
            }
        }

        fn cancel(&self) {}

        fn destroy(&self) {}
    }

    fn options(timeout_ms: u64) -> SendOptions {
        SendOptions {
            timeout: Duration::from_millis(timeout_ms),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_accepted_write_resolves() {
        let handle = TestHandle(Behavior::Accept);
        send(&handle, SubscribeRequest::default(), &options(100))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out_with_request() {
        let handle = TestHandle(Behavior::Stall);
        let err = ping(&handle, 5, &options(100)).await.unwrap_err();
        match err {
            ClientError::RequestTimeout { request } => assert_eq!(request.ping.unwrap().id, 5),
            other => panic!("Expected RequestTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_write_carries_request_and_cause() {
        let handle = TestHandle(Behavior::Reject);
        let err = ping(&handle, 2, &options(100)).await.unwrap_err();
        match err {
            ClientError::RequestWriteFailed { request, source } => {
                assert!(request.is_ping());
                assert!(matches!(source, TransportError::WriteFailed(_)));
            }
            other => panic!("Expected RequestWriteFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_pending_write() {
        let handle = TestHandle(Behavior::Stall);
        let opts = options(60_000);
        let cancel = opts.cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let err = send(&handle, SubscribeRequest::default(), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Aborted));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_writes() {
        let handle = TestHandle(Behavior::Accept);
        let opts = options(100);
        opts.cancel.cancel();

        let err = send(&handle, SubscribeRequest::default(), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Aborted));
    }
}
