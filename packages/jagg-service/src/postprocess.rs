//! In-place enrichment of executed buckets.

use ahash::AHashMap;

use jagg_domain::{AggregationBucket, VelocityConfig};

use crate::categorize::SINGLE_STATE;

/// Attaches the configured priority order and, unless the caller sorted explicitly, orders
/// buckets by it. Lower order is more urgent; priorities without a rank keep their relative
/// order after the ranked ones.
pub(crate) fn rank_priorities(
	buckets: &mut [AggregationBucket],
	ranks: &AHashMap<String, i64>,
	explicit_sort: bool,
) {
	let rank_of = |bucket: &AggregationBucket| {
		bucket.key.as_deref().and_then(|key| ranks.get(&key.to_uppercase()).copied())
	};

	for bucket in buckets.iter_mut() {
		if bucket.priority_order.is_none() {
			bucket.priority_order = rank_of(bucket);
		}
	}

	if !explicit_sort {
		buckets.sort_by_key(|bucket| match rank_of(bucket) {
			Some(rank) => (0, rank),
			None => (1, 0),
		});
	}
}

/// Orders velocity report rows by configured stage order, unconfigured stages next and the
/// single-state total last.
pub(crate) fn order_velocity_stages(buckets: &mut [AggregationBucket], config: &VelocityConfig) {
	for bucket in buckets.iter_mut() {
		if bucket.velocity_stage.is_none() {
			bucket.velocity_stage = bucket.key.clone();
		}
	}

	buckets.sort_by_key(|bucket| {
		let stage = bucket.velocity_stage.as_deref().unwrap_or_default();

		if stage == SINGLE_STATE {
			return (2, 0);
		}

		match config.order_of(stage) {
			Some(order) => (0, order),
			None => (1, 0),
		}
	});
}
