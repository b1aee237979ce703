// Perception side of the coordination channel.
//
// Camera capture and marker recognition are external; they reach the
// core as a stream of detection events (one JSON object per line when
// fed from the detector process). This module owns the cue policy and
// the task that turns detections into PlayCue/StopCue messages.

use std::collections::HashSet;
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::CuePolicy;
use crate::messages::{CoordinationMessage, DetectionEvent};

/// A stream of marker detection events. `Ok(None)` means the stream
/// ended. Reads may block for up to one camera frame.
pub trait DetectionSource: Send {
    fn next_event(&mut self) -> std::io::Result<Option<DetectionEvent>>;
}

/// Detection events as JSON lines from a reader (the detector process's
/// pipe, a FIFO, or a replay file).
pub struct JsonLineSource<R: BufRead + Send> {
    reader: R,
}

impl<R: BufRead + Send> JsonLineSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead + Send> DetectionSource for JsonLineSource<R> {
    fn next_event(&mut self) -> std::io::Result<Option<DetectionEvent>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DetectionEvent>(line.trim()) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    warn!("Failed to parse detection event: {}", e);
                }
            }
        }
    }
}

/// Decides whether a detection event fires the cue, per the configured
/// retrigger policy.
#[derive(Debug)]
pub struct CueTracker {
    policy: CuePolicy,
    seen: HashSet<u32>,
}

impl CueTracker {
    pub fn new(policy: CuePolicy) -> Self {
        Self {
            policy,
            seen: HashSet::new(),
        }
    }

    pub fn should_cue(&mut self, event: &DetectionEvent) -> bool {
        match self.policy {
            CuePolicy::EveryDetection => !event.marker_ids.is_empty(),
            CuePolicy::OncePerMarker => {
                let mut any_new = false;
                for &id in &event.marker_ids {
                    if self.seen.insert(id) {
                        any_new = true;
                    }
                }
                any_new
            }
        }
    }
}

/// Perception task: read detections, apply the cue policy, post cues
/// into the coordination channel. Each PlayCue schedules a
/// generation-tagged auto-StopCue so an old timer cannot cut a newer
/// cue short. Producers stop sending once the cancellation flag is set.
pub async fn run(
    mut source: Box<dyn DetectionSource>,
    tx: UnboundedSender<CoordinationMessage>,
    cancel: Arc<AtomicBool>,
    policy: CuePolicy,
    cue_hold: Duration,
) {
    let mut tracker = CueTracker::new(policy);
    let cue_generation = Arc::new(AtomicU64::new(0));

    info!("Perception task started (policy {:?})", policy);

    loop {
        if cancel.load(Ordering::Acquire) {
            break;
        }

        // Source reads block for up to a camera frame, so they run off
        // the async executor
        let joined = tokio::task::spawn_blocking(move || {
            let event = source.next_event();
            (source, event)
        })
        .await;

        let (returned, event) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Perception read task failed: {}", e);
                break;
            }
        };
        source = returned;

        match event {
            Ok(Some(event)) => {
                debug!(
                    "Detection: ids {:?} at {} ms",
                    event.marker_ids, event.timestamp_ms
                );
                if !tracker.should_cue(&event) {
                    continue;
                }
                info!("Marker cue fired for ids {:?}", event.marker_ids);
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                if tx.send(CoordinationMessage::PlayCue).is_err() {
                    break;
                }

                let generation = cue_generation.fetch_add(1, Ordering::AcqRel) + 1;
                let stop_tx = tx.clone();
                let stop_cancel = Arc::clone(&cancel);
                let stop_generation = Arc::clone(&cue_generation);
                tokio::spawn(async move {
                    tokio::time::sleep(cue_hold).await;
                    let superseded = stop_generation.load(Ordering::Acquire) != generation;
                    if superseded || stop_cancel.load(Ordering::Acquire) {
                        return;
                    }
                    let _ = stop_tx.send(CoordinationMessage::StopCue);
                });
            }
            Ok(None) => {
                info!("Detection stream ended");
                break;
            }
            Err(e) => {
                warn!("Detection source error: {}", e);
                break;
            }
        }
    }

    info!("Perception task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn event(ids: &[u32]) -> DetectionEvent {
        DetectionEvent {
            marker_ids: ids.to_vec(),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn once_per_marker_fires_on_new_ids_only() {
        let mut tracker = CueTracker::new(CuePolicy::OncePerMarker);
        assert!(tracker.should_cue(&event(&[7])));
        // Same marker still visible next frame: no retrigger
        assert!(!tracker.should_cue(&event(&[7])));
        // A new id alongside the old one fires again
        assert!(tracker.should_cue(&event(&[7, 9])));
        assert!(!tracker.should_cue(&event(&[9])));
    }

    #[test]
    fn every_detection_refires_each_event() {
        let mut tracker = CueTracker::new(CuePolicy::EveryDetection);
        assert!(tracker.should_cue(&event(&[7])));
        assert!(tracker.should_cue(&event(&[7])));
        assert!(!tracker.should_cue(&event(&[])));
    }

    #[test]
    fn json_line_source_parses_and_skips_garbage() {
        let input = "\n{\"marker_ids\":[3,5],\"timestamp_ms\":12}\nnot json\n{\"marker_ids\":[],\"timestamp_ms\":13}\n";
        let mut source = JsonLineSource::new(Cursor::new(input));
        assert_eq!(source.next_event().unwrap(), Some(event2(&[3, 5], 12)));
        // Malformed line is skipped, not fatal
        assert_eq!(source.next_event().unwrap(), Some(event2(&[], 13)));
        assert_eq!(source.next_event().unwrap(), None);
    }

    fn event2(ids: &[u32], ts: u64) -> DetectionEvent {
        DetectionEvent {
            marker_ids: ids.to_vec(),
            timestamp_ms: ts,
        }
    }

    #[tokio::test]
    async fn task_posts_cue_and_auto_stop() {
        let input = "{\"marker_ids\":[1],\"timestamp_ms\":0}\n";
        let source = Box::new(JsonLineSource::new(Cursor::new(input.to_string())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));

        run(
            source,
            tx,
            Arc::clone(&cancel),
            CuePolicy::OncePerMarker,
            Duration::from_millis(10),
        )
        .await;

        assert_eq!(rx.recv().await, Some(CoordinationMessage::PlayCue));
        let stop = timeout(Duration::from_millis(500), rx.recv()).await.unwrap();
        assert_eq!(stop, Some(CoordinationMessage::StopCue));
    }

    #[tokio::test]
    async fn cancelled_task_sends_nothing() {
        let input = "{\"marker_ids\":[1],\"timestamp_ms\":0}\n";
        let source = Box::new(JsonLineSource::new(Cursor::new(input.to_string())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(true));

        run(
            source,
            tx,
            cancel,
            CuePolicy::OncePerMarker,
            Duration::from_millis(10),
        )
        .await;

        assert!(rx.try_recv().is_err());
    }
}
