use serde::{Deserialize, Serialize};

use crate::db::models::PredictionRow;

/// Crowd view of a market: the straight mean of every prediction, plus the
/// requesting user's own estimate if they made one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Consensus {
    pub user_prediction: Option<f64>,
    pub average_probability: Option<f64>,
    pub prediction_count: usize,
}

pub fn aggregate(predictions: &[PredictionRow], requester_id: Option<&str>) -> Consensus {
    let user_prediction = requester_id.and_then(|uid| {
        predictions
            .iter()
            .find(|p| p.user_id == uid)
            .map(|p| p.probability)
    });

    let average_probability = if predictions.is_empty() {
        None
    } else {
        let sum: f64 = predictions.iter().map(|p| p.probability).sum();
        Some(sum / predictions.len() as f64)
    };

    Consensus {
        user_prediction,
        average_probability,
        prediction_count: predictions.len(),
    }
}

/// `0.425` → `"42.5%"`.
pub fn format_percent(probability: f64) -> String {
    format!("{:.1}%", probability * 100.0)
}

impl Consensus {
    /// Headline shown under "Current Probability".
    pub fn summary(&self) -> String {
        match self.average_probability {
            Some(avg) => format!(
                "{} (based on {} predictions)",
                format_percent(avg),
                self.prediction_count
            ),
            None => "No predictions yet".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(user_id: &str, probability: f64) -> PredictionRow {
        PredictionRow {
            user_id: user_id.to_string(),
            probability,
            email: format!("{user_id}@example.com"),
            username: None,
        }
    }

    #[test]
    fn empty_has_no_average() {
        let c = aggregate(&[], Some("u1"));
        assert_eq!(c.average_probability, None);
        assert_eq!(c.user_prediction, None);
        assert_eq!(c.prediction_count, 0);
        assert_eq!(c.summary(), "No predictions yet");
    }

    #[test]
    fn average_is_straight_mean() {
        let preds = vec![prediction("a", 0.2), prediction("b", 0.5), prediction("c", 0.8)];
        let c = aggregate(&preds, None);
        let expected = (0.2 + 0.5 + 0.8) / 3.0;
        assert!((c.average_probability.unwrap() - expected).abs() < 1e-12);
        assert_eq!(c.prediction_count, 3);
    }

    #[test]
    fn requester_sees_own_prediction() {
        let preds = vec![prediction("a", 0.1), prediction("b", 0.9)];
        assert_eq!(aggregate(&preds, Some("b")).user_prediction, Some(0.9));
        assert_eq!(aggregate(&preds, Some("z")).user_prediction, None);
        assert_eq!(aggregate(&preds, None).user_prediction, None);
    }

    #[test]
    fn summary_uses_one_decimal() {
        let preds = vec![prediction("a", 0.5), prediction("b", 0.25)];
        assert_eq!(aggregate(&preds, None).summary(), "37.5% (based on 2 predictions)");
        assert_eq!(format_percent(1.0), "100.0%");
    }
}
