//! Runs a segmentation model on its own thread.
//!
//! The orchestrator sends one request per tick and waits for the reply up to
//! a timeout. At most one request is in flight; a reply that arrives after its
//! tick gave up is drained at the start of the next request and discarded, so
//! a mask is never applied to a frame other than the one it was computed for.

use super::MaskSource;
use crate::error::{PipelineError, Result};
use crate::imaging::ensure_rgba;
use crate::mask::RawMask;
use crate::segmentation::SegmentationModel;
use image::RgbaImage;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum Request {
    Segment { seq: u64, frame: RgbaImage },
    Reset,
}

struct Response {
    seq: u64,
    /// Handed back so the next request can reuse its storage.
    frame: RgbaImage,
    result: anyhow::Result<Option<RawMask>>,
}

pub struct SegmentationWorker {
    requests: Option<Sender<Request>>,
    responses: Receiver<Response>,
    handle: Option<JoinHandle<()>>,
    timeout: Duration,
    next_seq: u64,
    in_flight: Option<u64>,
    spare: Option<RgbaImage>,
}

impl SegmentationWorker {
    pub fn spawn(mut model: Box<dyn SegmentationModel>, timeout: Duration) -> anyhow::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (response_tx, response_rx) = mpsc::channel::<Response>();

        let handle = std::thread::Builder::new()
            .name("segmentation".into())
            .spawn(move || {
                tracing::debug!("Segmentation worker started");
                while let Ok(request) = request_rx.recv() {
                    match request {
                        Request::Segment { seq, frame } => {
                            let result = model.segment(&frame);
                            if response_tx.send(Response { seq, frame, result }).is_err() {
                                break;
                            }
                        }
                        Request::Reset => model.reset_state(),
                    }
                }
                tracing::debug!("Segmentation worker stopped");
            })?;

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            handle: Some(handle),
            timeout,
            next_seq: 0,
            in_flight: None,
            spare: None,
        })
    }

    fn receive(&mut self, deadline: Instant) -> Result<(u64, anyhow::Result<Option<RawMask>>)> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.responses.recv_timeout(remaining) {
            Ok(Response { seq, frame, result }) => {
                self.in_flight = None;
                self.spare = Some(frame);
                Ok((seq, result))
            }
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::MaskUnavailable(format!(
                "segmentation exceeded {:?}",
                self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::MaskUnavailable(
                "segmentation worker stopped".into(),
            )),
        }
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests
            .as_ref()
            .and_then(|tx| tx.send(request).ok())
            .ok_or_else(|| PipelineError::MaskUnavailable("segmentation worker stopped".into()))
    }
}

impl MaskSource for SegmentationWorker {
    fn acquire(&mut self, frame: &RgbaImage) -> Result<RawMask> {
        let deadline = Instant::now() + self.timeout;

        if self.in_flight.is_some() {
            let (seq, _) = self.receive(deadline)?;
            tracing::debug!(seq, "Discarded late segmentation result");
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let mut buffer = self.spare.take().unwrap_or_else(|| RgbaImage::new(0, 0));
        ensure_rgba(&mut buffer, frame.width(), frame.height());
        let pixels: &mut [u8] = &mut buffer;
        pixels.copy_from_slice(frame.as_raw());

        self.send(Request::Segment { seq, frame: buffer })?;
        self.in_flight = Some(seq);

        match self.receive(deadline)? {
            (_, Ok(Some(mask))) => Ok(mask),
            (_, Ok(None)) => Err(PipelineError::MaskUnavailable(
                "model returned no mask".into(),
            )),
            (_, Err(err)) => Err(PipelineError::MaskUnavailable(format!("{err:#}"))),
        }
    }

    fn reset(&mut self) {
        if self.send(Request::Reset).is_err() {
            tracing::warn!("Segmentation worker gone, cannot reset model state");
        }
    }
}

impl Drop for SegmentationWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Segmentation worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fills the mask with a value derived from the frame's first red sample.
    struct EchoModel {
        delay: Duration,
        resets: Arc<AtomicUsize>,
    }

    impl SegmentationModel for EchoModel {
        fn segment(&mut self, frame: &RgbaImage) -> anyhow::Result<Option<RawMask>> {
            std::thread::sleep(self.delay);
            let (w, h) = frame.dimensions();
            let value = frame.get_pixel(0, 0)[0];
            if value == 0 {
                return Ok(None);
            }
            if value == 1 {
                anyhow::bail!("model exploded");
            }
            Ok(Some(RawMask::from_intensity(
                w,
                h,
                vec![value; (w * h) as usize],
            )))
        }

        fn reset_state(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn input_size(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    fn worker(delay_ms: u64, timeout_ms: u64) -> (SegmentationWorker, Arc<AtomicUsize>) {
        let resets = Arc::new(AtomicUsize::new(0));
        let model = EchoModel {
            delay: Duration::from_millis(delay_ms),
            resets: resets.clone(),
        };
        let worker =
            SegmentationWorker::spawn(Box::new(model), Duration::from_millis(timeout_ms)).unwrap();
        (worker, resets)
    }

    fn frame(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(4, 3, image::Rgba([value, 0, 0, 255]))
    }

    #[test]
    fn returns_mask_for_each_request() {
        let (mut worker, _) = worker(0, 1000);
        let mask = worker.acquire(&frame(200)).unwrap();
        assert_eq!(mask.dimensions(), (4, 3));
        assert_eq!(mask.intensity(2, 2), 200);

        let mask = worker.acquire(&frame(90)).unwrap();
        assert_eq!(mask.intensity(0, 0), 90);
    }

    #[test]
    fn no_mask_and_errors_become_unavailable() {
        let (mut worker, _) = worker(0, 1000);
        assert!(matches!(
            worker.acquire(&frame(0)),
            Err(PipelineError::MaskUnavailable(_))
        ));
        match worker.acquire(&frame(1)) {
            Err(PipelineError::MaskUnavailable(msg)) => assert!(msg.contains("exploded")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn late_result_is_never_applied_to_a_newer_frame() {
        let (mut worker, _) = worker(150, 30);
        assert!(matches!(
            worker.acquire(&frame(10)),
            Err(PipelineError::MaskUnavailable(_))
        ));

        // Give the worker a generous budget now; the stale reply for frame 10
        // must be dropped and the new frame answered.
        worker.timeout = Duration::from_millis(2000);
        let mask = worker.acquire(&frame(20)).unwrap();
        assert_eq!(mask.intensity(0, 0), 20);
    }

    #[test]
    fn reset_reaches_model() {
        let (mut worker, resets) = worker(0, 1000);
        worker.reset();
        // A round trip guarantees the reset was processed first.
        worker.acquire(&frame(5)).unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }
}
