// src/overlay.rs
use log::info;

use crate::detector::{DetectedFace, DetectionEvent};

// Classification thresholds. Yaw beyond +/-15 degrees counts as a head
// turn, smiling probability strictly above 0.5 counts as a smile.
const TURN_YAW_THRESHOLD_DEG: f32 = 15.0;
const SMILE_PROBABILITY_THRESHOLD: f32 = 0.5;

/// Screen-space rectangle marking the first detected face, plus the head
/// orientation angles carried over from the source face.
///
/// Recomputed wholesale from every [`DetectionEvent`]; there is no tracking
/// or smoothing across events. The single `Option<OverlayBox>` slot lives in
/// the UI and is replaced on every received event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub yaw_angle: f32,
    pub roll_angle: f32,
}

/// Head-turn classification derived from the yaw angle. Log-only, never
/// part of the overlay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Left,
    Right,
    Neutral,
}

/// Derive the overlay box for one detection event.
///
/// Empty face list clears the overlay. Otherwise the first face's bounds are
/// copied verbatim (identity mapping, no transformation) and its yaw/roll
/// carried unchanged. Pure function: emits nothing, classification side
/// effects live in [`log_detection`].
pub fn reduce(event: &DetectionEvent) -> Option<OverlayBox> {
    let face = event.faces.first()?;
    Some(OverlayBox {
        x: face.bounds.x,
        y: face.bounds.y,
        width: face.bounds.width,
        height: face.bounds.height,
        yaw_angle: face.yaw_angle,
        roll_angle: face.roll_angle,
    })
}

/// Strictly above the threshold counts as smiling; exactly 0.5 does not.
/// An absent probability means the backend did not classify expressions and
/// is treated as "not smiling", not as an error.
pub fn is_smiling(smiling_probability: Option<f32>) -> bool {
    smiling_probability.is_some_and(|p| p > SMILE_PROBABILITY_THRESHOLD)
}

/// Strict inequalities: a yaw of exactly +/-15 degrees is still neutral.
pub fn classify_turn(yaw_angle: f32) -> TurnDirection {
    if yaw_angle > TURN_YAW_THRESHOLD_DEG {
        TurnDirection::Right
    } else if yaw_angle < -TURN_YAW_THRESHOLD_DEG {
        TurnDirection::Left
    } else {
        TurnDirection::Neutral
    }
}

/// Emit the diagnostic log lines for one detection event.
///
/// Observational only: kept separate from [`reduce`] so the returned state
/// never depends on logging and both stay independently testable.
pub fn log_detection(event: &DetectionEvent) {
    let Some(face) = event.faces.first() else {
        return;
    };

    info!("Face detected: {}", face_summary(face));

    match face.smiling_probability {
        Some(p) => info!("Smiling probability: {}", p),
        None => info!("Smiling probability not reported"),
    }

    if is_smiling(face.smiling_probability) {
        info!("smile");
    }

    match classify_turn(face.yaw_angle) {
        TurnDirection::Right => info!("Turned right"),
        TurnDirection::Left => info!("Turned left"),
        TurnDirection::Neutral => {}
    }
}

/// Convenience for the UI thread: log then reduce, once per event.
pub fn observe_and_reduce(event: &DetectionEvent) -> Option<OverlayBox> {
    log_detection(event);
    reduce(event)
}

fn face_summary(face: &DetectedFace) -> String {
    format!(
        "bounds=({}, {}, {}x{}) yaw={} roll={}",
        face.bounds.x,
        face.bounds.y,
        face.bounds.width,
        face.bounds.height,
        face.yaw_angle,
        face.roll_angle
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FaceBounds;

    fn face(x: f32, y: f32, width: f32, height: f32, yaw: f32, roll: f32) -> DetectedFace {
        DetectedFace {
            bounds: FaceBounds {
                x,
                y,
                width,
                height,
            },
            yaw_angle: yaw,
            roll_angle: roll,
            smiling_probability: None,
        }
    }

    fn event(faces: Vec<DetectedFace>) -> DetectionEvent {
        DetectionEvent { faces }
    }

    #[test]
    fn empty_event_clears_overlay() {
        assert_eq!(reduce(&event(vec![])), None);
    }

    #[test]
    fn bounds_copied_verbatim_from_first_face() {
        let ev = event(vec![
            face(10.5, 20.25, 100.0, 120.0, 3.0, -2.0),
            face(500.0, 500.0, 50.0, 50.0, 30.0, 0.0),
        ]);
        let boxed = reduce(&ev).expect("one face present");
        assert_eq!(boxed.x, 10.5);
        assert_eq!(boxed.y, 20.25);
        assert_eq!(boxed.width, 100.0);
        assert_eq!(boxed.height, 120.0);
        assert_eq!(boxed.yaw_angle, 3.0);
        assert_eq!(boxed.roll_angle, -2.0);
    }

    #[test]
    fn turn_classification_boundaries_are_exclusive() {
        assert_eq!(classify_turn(16.0), TurnDirection::Right);
        assert_eq!(classify_turn(15.0), TurnDirection::Neutral);
        assert_eq!(classify_turn(-16.0), TurnDirection::Left);
        assert_eq!(classify_turn(-15.0), TurnDirection::Neutral);
        assert_eq!(classify_turn(0.0), TurnDirection::Neutral);
    }

    #[test]
    fn smile_threshold_is_strict() {
        assert!(is_smiling(Some(0.51)));
        assert!(!is_smiling(Some(0.5)));
        assert!(is_smiling(Some(1.0)));
        assert!(!is_smiling(Some(0.0)));
    }

    #[test]
    fn absent_smiling_probability_degrades_gracefully() {
        assert!(!is_smiling(None));
        // A face without classifier output still produces an overlay.
        let ev = event(vec![face(0.0, 0.0, 10.0, 10.0, 0.0, 0.0)]);
        assert!(reduce(&ev).is_some());
    }

    #[test]
    fn reduce_is_idempotent() {
        let ev = event(vec![face(1.0, 2.0, 3.0, 4.0, 20.0, 5.0)]);
        assert_eq!(reduce(&ev), reduce(&ev));
    }

    #[test]
    fn logging_does_not_affect_reduced_state() {
        let mut f = face(1.0, 2.0, 3.0, 4.0, 20.0, 5.0);
        f.smiling_probability = Some(0.9);
        let ev = event(vec![f]);
        let direct = reduce(&ev);
        let observed = observe_and_reduce(&ev);
        assert_eq!(direct, observed);
    }

    #[test]
    fn overlay_is_replaced_not_merged_across_events() {
        // Event A with a face, then event B with none: final state absent.
        let a = event(vec![face(10.0, 10.0, 40.0, 40.0, 0.0, 0.0)]);
        let b = event(vec![]);

        let mut current = reduce(&a);
        assert!(current.is_some());
        current = reduce(&b);
        assert_eq!(current, None);
    }
}
