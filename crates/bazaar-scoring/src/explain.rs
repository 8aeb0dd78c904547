//! Human-readable explanations
//!
//! One sentence derived from the dominant component. Deterministic for a
//! given candidate and context.

use crate::kernel::ScoringContext;
use bazaar_model::{Candidate, Component};

/// Explanation sentence for `candidate`
#[must_use]
pub fn explain(dominant: Component, candidate: &Candidate, ctx: &ScoringContext) -> String {
    let counters = &candidate.counters;
    match dominant {
        Component::Engagement => format!(
            "Popular with the community: {} upvotes and {} views",
            counters.upvote_count, counters.view_count
        ),
        Component::Recency => {
            let days = candidate.age_in_days.max(0.0).floor() as u64;
            match days {
                0 => "Launched today".to_string(),
                1 => "Launched yesterday".to_string(),
                n => format!("Launched {n} days ago"),
            }
        }
        Component::Trending => format!(
            "Trending: {} upvotes and {} views in the last {} days",
            candidate.recent.recent_upvotes,
            candidate.recent.recent_views,
            if candidate.recent.window_days == 0 {
                7
            } else {
                candidate.recent.window_days
            }
        ),
        Component::Similarity => match &ctx.source {
            Some(source) => {
                let shared = candidate
                    .product
                    .tags
                    .intersection(&source.product.tags)
                    .count();
                if shared > 0 {
                    format!("Similar to {} ({} shared tags)", source.product.name, shared)
                } else {
                    format!("Similar to {}", source.product.name)
                }
            }
            None => "Similar to products you viewed".to_string(),
        },
        Component::Personalization => {
            if candidate.category.name.is_empty() {
                "Matches your interests".to_string()
            } else {
                format!("Matches your interest in {}", candidate.category.name)
            }
        }
        Component::TagMatch => {
            let matched: Vec<&str> = candidate
                .product
                .tags
                .iter()
                .filter(|t| ctx.query_tags.contains(*t))
                .map(String::as_str)
                .collect();
            if matched.is_empty() {
                "Matches your search".to_string()
            } else {
                format!("Tagged {}", matched.join(", "))
            }
        }
        Component::Psychological => "A timely pick for right now".to_string(),
        Component::Quality => "Well received by the people who tried it".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use bazaar_model::Product;
    use chrono::Utc;

    fn candidate(age: f64) -> Candidate {
        let product = Product::new("p", "p", "m", "c").with_tags(["ai", "dev"]);
        Candidate::bare(product, age)
    }

    #[test]
    fn recency_wording() {
        let ctx = ScoringContext::new(Strategy::New, Utc::now());
        assert_eq!(explain(Component::Recency, &candidate(0.4), &ctx), "Launched today");
        assert_eq!(explain(Component::Recency, &candidate(3.9), &ctx), "Launched 3 days ago");
    }

    #[test]
    fn tag_match_lists_matching_tags() {
        let ctx = ScoringContext::new(Strategy::Tag, Utc::now()).with_query_tags(["dev"]);
        assert_eq!(explain(Component::TagMatch, &candidate(1.0), &ctx), "Tagged dev");
    }
}
