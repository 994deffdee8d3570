//! Outbound request body with activity tracking.
//!
//! The socket timeout is an inactivity limit. While the request body is still
//! streaming, every frame pushes the deadline forward; once the body has
//! ended, the origin gets the full limit to produce a response head.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use axum::body::Body;
use hyper::body::{Body as HttpBody, Bytes, Frame, SizeHint};
use tokio::time::Instant;

/// Time of the last observed request-body progress, shared with the executor.
#[derive(Debug, Clone)]
pub(crate) struct Activity {
    last: Arc<Mutex<Instant>>,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub(crate) fn touch(&self) {
        *self.last.lock().expect("activity mutex poisoned") = Instant::now();
    }

    pub(crate) fn last(&self) -> Instant {
        *self.last.lock().expect("activity mutex poisoned")
    }
}

/// Passes request body frames through unchanged, recording each one.
pub(crate) struct UploadBody {
    inner: Body,
    activity: Activity,
}

impl UploadBody {
    pub(crate) fn new(inner: Body, activity: Activity) -> Self {
        Self { inner, activity }
    }
}

impl HttpBody for UploadBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if polled.is_ready() {
            // Frames, the end of the body and errors all count as progress.
            this.activity.touch();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
