// ============================================================================
// SEGMENTATION — external edge-detection provider, request tokens, timeout
// ============================================================================
//
// The magnetic brush is the engine's only suspending operation. The engine
// never blocks on the provider: it issues a ticket (token + deadline), the
// host runs `segment` wherever it likes (worker thread, async task), and
// delivers the result back with the ticket. A result whose token has been
// superseded — a newer request, or a tool switch — is discarded on arrival,
// and one past the 2000 ms deadline times out. Both leave the mask buffer
// untouched. Token ordering also guarantees results never apply out of
// request order: accepting a ticket invalidates every earlier one.

use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::error::SegmentationError;
use crate::geometry::{PixelRect, Point};

pub const SEGMENTATION_TIMEOUT: Duration = Duration::from_millis(2000);

/// A candidate mask region produced by the provider.
#[derive(Clone, Debug)]
pub struct SegmentationResult {
    /// Row-major alpha covering `bounds`.
    pub alpha: Vec<u8>,
    pub bounds: PixelRect,
    /// Provider confidence in [0, 1].
    pub confidence: f32,
    pub inference_time_ms: u64,
}

/// External edge-detection collaborator: given a seed point and the current
/// image, produce a candidate mask region.
pub trait SegmentationProvider {
    fn segment(&self, point: Point, image: &RgbaImage) -> Result<SegmentationResult, SegmentationError>;
}

/// Handle for one in-flight segmentation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentationTicket {
    token: u64,
    issued_at: Instant,
}

/// Tracks the single latest request. Cancellation is cooperative: nothing
/// aborts the provider, stale results are simply refused here.
#[derive(Default)]
pub struct SegmentationGate {
    next_token: u64,
    current: Option<SegmentationTicket>,
}

impl SegmentationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket for a new request, superseding any outstanding one.
    pub fn issue(&mut self, now: Instant) -> SegmentationTicket {
        self.next_token += 1;
        let ticket = SegmentationTicket { token: self.next_token, issued_at: now };
        self.current = Some(ticket);
        ticket
    }

    /// Invalidate the outstanding request (tool switch, new image).
    pub fn cancel(&mut self) {
        if self.current.take().is_some() {
            crate::log_info!("segmentation: outstanding request cancelled");
        }
    }

    pub fn in_flight(&self) -> bool {
        self.current.is_some()
    }

    /// Validate a delivered result's ticket. On success the gate closes (the
    /// ticket is single-use); on failure the caller must leave the mask
    /// untouched.
    pub fn accept(&mut self, ticket: SegmentationTicket, now: Instant) -> Result<(), SegmentationError> {
        match self.current {
            Some(cur) if cur == ticket => {}
            _ => return Err(SegmentationError::Stale),
        }
        if now.duration_since(ticket.issued_at) > SEGMENTATION_TIMEOUT {
            self.current = None;
            return Err(SegmentationError::Timeout(SEGMENTATION_TIMEOUT.as_millis() as u64));
        }
        self.current = None;
        Ok(())
    }
}
