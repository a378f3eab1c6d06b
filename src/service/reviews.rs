//! Reviews on pull requests.

use tracing::{info, warn};

use crate::types::{PullId, Review, ReviewId, ReviewType, User};
use crate::webhooks::DomainEvent;

use super::{PullService, ServiceResult};

impl PullService {
    /// Record a review by `reviewer` and announce it.
    pub fn create_review(
        &self,
        id: PullId,
        reviewer: User,
        review_type: ReviewType,
        content: String,
    ) -> ServiceResult<Review> {
        let pull = self.store().pull(id)?;
        let review = self
            .store()
            .insert_review(pull.issue_id, review_type, reviewer, content)?;
        info!(pull = %id, review = %review.id, kind = review.review_type.as_str(), "review submitted");
        self.announce_review(id, &review);
        Ok(review)
    }

    /// Replace a review's text. Every edit is announced again.
    pub fn update_review(&self, id: PullId, review: ReviewId, content: String) -> ServiceResult<Review> {
        let review = self.store().update_review_content(review, content)?;
        self.announce_review(id, &review);
        Ok(review)
    }

    fn announce_review(&self, id: PullId, review: &Review) {
        match self.store().context(id) {
            Ok(ctx) => self.machine.notifier().notify(DomainEvent::Review {
                pull: Box::new(ctx),
                review: review.clone(),
            }),
            Err(e) => warn!(pull = %id, error = %e, "cannot load pull request for review notification"),
        }
    }
}
