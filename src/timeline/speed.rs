use tracing::warn;

use crate::error::{PipelineError, Result};

/// 感知质量可接受的速度区间，超出只警告不阻止
const SPEED_COMFORT_RANGE: (f64, f64) = (0.5, 1.5);

/// 推导统一应用到每个场景的全局播放速度
///
/// 两个参数必须恰好给出一个：直接给速度则原样使用；给目标总时长则
/// `speed = sum(final) / target`。每个场景单独调速会让音画与字幕
/// 失去同步，所以全局只存在这一个系数。
pub fn plan_global_speed(
    total_duration: f64,
    global_speed: Option<f64>,
    target_total_duration: Option<f64>,
) -> Result<f64> {
    let speed = match (global_speed, target_total_duration) {
        (Some(_), Some(_)) => {
            return Err(PipelineError::ResolutionConflict(
                "both global_speed and target_total_duration were supplied".to_string(),
            ))
        }
        (None, None) => {
            return Err(PipelineError::ResolutionConflict(
                "neither global_speed nor target_total_duration was supplied".to_string(),
            ))
        }
        (Some(speed), None) => speed,
        (None, Some(target)) => {
            if target <= 0.0 {
                return Err(PipelineError::ResolutionConflict(format!(
                    "target_total_duration must be positive, got {target}"
                )));
            }
            total_duration / target
        }
    };

    if speed <= 0.0 || !speed.is_finite() {
        return Err(PipelineError::ResolutionConflict(format!(
            "global speed must be a positive finite number, got {speed}"
        )));
    }

    let (lo, hi) = SPEED_COMFORT_RANGE;
    if speed < lo || speed > hi {
        warn!(
            "Global speed {:.3} is outside [{}, {}], output quality may degrade",
            speed, lo, hi
        );
    }

    Ok(speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_speed_is_used_as_is() {
        assert_eq!(plan_global_speed(19.7, Some(0.92), None).unwrap(), 0.92);
    }

    #[test]
    fn target_duration_derives_the_speed() {
        let speed = plan_global_speed(19.7, None, Some(15.76)).unwrap();
        assert!((speed - 1.25).abs() < 1e-9);
    }

    #[test]
    fn both_or_neither_is_a_conflict() {
        assert!(matches!(
            plan_global_speed(10.0, Some(1.0), Some(10.0)),
            Err(PipelineError::ResolutionConflict(_))
        ));
        assert!(matches!(
            plan_global_speed(10.0, None, None),
            Err(PipelineError::ResolutionConflict(_))
        ));
    }

    #[test]
    fn extreme_speed_is_allowed() {
        // 区间外只是警告，不阻止
        assert!(plan_global_speed(100.0, None, Some(10.0)).is_ok());
        assert!(plan_global_speed(10.0, Some(0.3), None).is_ok());
    }

    #[test]
    fn non_positive_values_are_rejected() {
        assert!(plan_global_speed(10.0, Some(0.0), None).is_err());
        assert!(plan_global_speed(10.0, None, Some(0.0)).is_err());
        assert!(plan_global_speed(10.0, Some(-1.0), None).is_err());
    }
}
