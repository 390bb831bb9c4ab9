//! Peer relevance scoring
//!
//! A candidate's unnormalized weight is the product of four non-negative factors:
//!
//! - latency: `1 / max(latency, floor)`, lower latency scores higher
//! - time-scaling similarity: Gaussian kernel on `tdf_sender - tdf_peer`
//! - distance: `1 / (1 + d / d0)`, measured from the *subject* to the peer
//! - closing speed: `1 + beta * max(0, closing) / v0`, where `closing` is the
//!   component of subject-vs-peer relative velocity that shrinks their gap
//!
//! Weights are then blended with a uniform `epsilon / N` floor by [`normalize`].

use crate::config::EngineConfig;
use crate::engine::participant::{ParticipantId, ParticipantRecord};

/// Inverse latency with a floor so zero latency stays finite
#[inline(always)]
pub fn latency_term(latency: f64, floor: f64) -> f64 {
    1.0 / latency.max(floor)
}

/// Gaussian kernel on the difference of two time-scaling factors
#[inline(always)]
pub fn tdf_similarity(tdf_sender: f64, tdf_peer: f64, sigma: f64) -> f64 {
    let diff = tdf_sender - tdf_peer;
    (-(diff * diff) / (2.0 * sigma * sigma)).exp()
}

/// Hyperbolic falloff with subject-to-peer distance
#[inline(always)]
pub fn distance_term(distance: f64, d0: f64) -> f64 {
    1.0 / (1.0 + distance / d0)
}

/// Bonus for a subject and peer that are approaching each other
///
/// `distance` is the subject-to-peer distance. At zero distance there is no
/// direction to project onto, so the term is exactly 1. Huge velocities
/// saturate at `f64::MAX` instead of overflowing.
pub fn closing_speed_term(
    subject: &ParticipantRecord,
    peer: &ParticipantRecord,
    distance: f64,
    beta: f64,
    v0: f64,
) -> f64 {
    if distance == 0.0 {
        return 1.0;
    }

    let relative_velocity = subject.velocity - peer.velocity;
    let relative_position = subject.position - peer.position;
    let closing_speed = (-relative_velocity.dot(relative_position) / distance).max(0.0);

    (1.0 + beta * closing_speed / v0).min(f64::MAX)
}

/// Unnormalized weight of `peer` for an update about `subject` sent by `sender`
pub fn peer_weight(
    config: &EngineConfig,
    sender: &ParticipantRecord,
    subject: &ParticipantRecord,
    peer: &ParticipantRecord,
) -> f64 {
    let distance = subject.position.distance_to(peer.position);

    let weight = latency_term(peer.latency, config.latency_floor)
        * tdf_similarity(sender.tdf, peer.tdf, config.sigma)
        * distance_term(distance, config.d0)
        * closing_speed_term(subject, peer, distance, config.beta, config.v0);

    weight.min(f64::MAX)
}

/// Sum `weights`, rescaling them by the largest one first if the sum overflows
///
/// Relative shares are preserved, so the returned total is always finite.
pub fn total_weight(weights: &mut [(ParticipantId, f64)]) -> f64 {
    let total: f64 = weights.iter().map(|&(_, w)| w).sum();
    if total.is_finite() {
        return total;
    }

    let largest = weights.iter().map(|&(_, w)| w).fold(0.0, f64::max);
    for (_, weight) in weights.iter_mut() {
        *weight /= largest;
    }
    weights.iter().map(|&(_, w)| w).sum()
}

/// Epsilon-greedy blend of a weight share with the uniform floor
///
/// `population` is the total participant count, in range or not. A zero total
/// weight is replaced by 1 so the share stays finite.
#[inline]
pub fn normalize(weight: f64, total_weight: f64, epsilon: f64, population: usize) -> f64 {
    let denominator = if total_weight > 0.0 { total_weight } else { 1.0 };
    let floor = epsilon / population.max(1) as f64;
    ((1.0 - epsilon) * (weight / denominator) + floor).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::vec2::Vec2;

    const EPSILON: f64 = 1e-12;

    fn record(x: f64, y: f64, vx: f64, vy: f64) -> ParticipantRecord {
        ParticipantRecord {
            velocity: Vec2::new(vx, vy),
            ..ParticipantRecord::new(0, Vec2::new(x, y))
        }
    }

    #[test]
    fn test_latency_term_floor() {
        assert_eq!(latency_term(0.0, 0.001), 1000.0);
        assert_eq!(latency_term(-1.0, 0.001), 1000.0);
        assert!((latency_term(0.05, 0.001) - 20.0).abs() < EPSILON);
        assert!(latency_term(0.01, 0.001) > latency_term(0.02, 0.001));
    }

    #[test]
    fn test_tdf_similarity() {
        assert_eq!(tdf_similarity(1.0, 1.0, 0.1), 1.0);
        // One sigma apart: exp(-1/2)
        let one_sigma = tdf_similarity(0.9, 1.0, 0.1);
        assert!((one_sigma - (-0.5f64).exp()).abs() < 1e-9);
        // Symmetric
        assert_eq!(tdf_similarity(1.2, 1.0, 0.1), tdf_similarity(1.0, 1.2, 0.1));
        // Far apart underflows toward zero but never negative
        assert!(tdf_similarity(10.0, 1.0, 0.1) >= 0.0);
    }

    #[test]
    fn test_distance_term() {
        assert_eq!(distance_term(0.0, 100.0), 1.0);
        assert_eq!(distance_term(100.0, 100.0), 0.5);
        assert!(distance_term(300.0, 100.0) < distance_term(200.0, 100.0));
    }

    #[test]
    fn test_closing_speed_approaching() {
        // Subject at origin heading +x at 10, peer 100 units ahead at rest
        let subject = record(0.0, 0.0, 10.0, 0.0);
        let peer = record(100.0, 0.0, 0.0, 0.0);
        let term = closing_speed_term(&subject, &peer, 100.0, 1.0, 5.0);
        assert!((term - 3.0).abs() < EPSILON);
    }

    #[test]
    fn test_closing_speed_receding_gets_no_bonus() {
        let subject = record(0.0, 0.0, -10.0, 0.0);
        let peer = record(100.0, 0.0, 0.0, 0.0);
        assert_eq!(closing_speed_term(&subject, &peer, 100.0, 1.0, 5.0), 1.0);
    }

    #[test]
    fn test_closing_speed_perpendicular_gets_no_bonus() {
        let subject = record(0.0, 0.0, 0.0, 10.0);
        let peer = record(100.0, 0.0, 0.0, 0.0);
        assert_eq!(closing_speed_term(&subject, &peer, 100.0, 1.0, 5.0), 1.0);
    }

    #[test]
    fn test_closing_speed_zero_distance() {
        let subject = record(50.0, 50.0, 10.0, 0.0);
        let peer = record(50.0, 50.0, -10.0, 0.0);
        let term = closing_speed_term(&subject, &peer, 0.0, 1.0, 5.0);
        assert_eq!(term, 1.0);
        assert!(!term.is_nan());
    }

    #[test]
    fn test_closing_speed_saturates() {
        let subject = record(0.0, 0.0, 1e307, 0.0);
        let peer = record(50.0, 0.0, 0.0, 0.0);
        let term = closing_speed_term(&subject, &peer, 50.0, 1.0, 5.0);
        assert_eq!(term, f64::MAX);

        let config = EngineConfig::default();
        let weight = peer_weight(&config, &subject, &subject, &peer);
        assert_eq!(weight, f64::MAX);
    }

    #[test]
    fn test_total_weight_rescales_on_overflow() {
        let mut weights: Vec<(ParticipantId, f64)> = vec![(1, f64::MAX), (2, f64::MAX), (3, 4.0)];
        let total = total_weight(&mut weights);
        assert!(total.is_finite());
        assert!((weights[0].1 / total - 0.5).abs() < EPSILON);
        assert!((weights[1].1 / total - 0.5).abs() < EPSILON);
        assert!(weights[2].1 / total < EPSILON);

        // Finite sums are left alone
        let mut weights: Vec<(ParticipantId, f64)> = vec![(1, 1.0), (2, 3.0)];
        assert_eq!(total_weight(&mut weights), 4.0);
        assert_eq!(weights[1].1, 3.0);
    }

    #[test]
    fn test_peer_weight_uses_subject_distance() {
        let config = EngineConfig::default();
        let sender = record(0.0, 0.0, 0.0, 0.0);
        let subject = record(200.0, 0.0, 0.0, 0.0);
        let mut near_subject = record(200.0, 0.0, 0.0, 0.0);
        near_subject.latency = 0.1;
        let mut near_sender = record(0.0, 0.0, 0.0, 0.0);
        near_sender.latency = 0.1;

        let w_near_subject = peer_weight(&config, &sender, &subject, &near_subject);
        let w_near_sender = peer_weight(&config, &sender, &subject, &near_sender);
        assert!(w_near_subject > w_near_sender);
        // latency 0.1 -> 10, same tdf -> 1, distance 0 -> 1, closing -> 1
        assert!((w_near_subject - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize() {
        assert!((normalize(1.0, 1.0, 0.05, 4) - (0.95 + 0.0125)).abs() < EPSILON);
        assert!((normalize(0.0, 2.0, 0.05, 4) - 0.0125).abs() < EPSILON);
        // Zero total weight falls back to a denominator of 1
        assert!((normalize(0.0, 0.0, 0.05, 2) - 0.025).abs() < EPSILON);
        assert!(normalize(5.0, 5.0, 0.0, 1) <= 1.0);
    }
}
