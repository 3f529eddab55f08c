use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::store::Store;
use crate::types::{User, UserId, UserStatus};

/// One allocation decision: whose turn it is, and whether that user already
/// held the token (`resumed`) rather than being freshly chosen.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub user: User,
    pub resumed: bool,
}

/// Fair round-robin token holder over the persisted user set.
///
/// Invariant: at most one user is `in_progress` at any instant. The only
/// transitions out of `in_progress` are the atomic handover performed here
/// and the compare-and-set exits (`release`, `mark_applied`).
pub struct Carousel {
    store: Arc<dyn Store>,
}

impl Carousel {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Advance the token and return the user whose turn it is.
    ///
    /// With a current holder, the next waiting user with a strictly greater
    /// id is chosen, wrapping to the smallest waiting id when none follows.
    /// When nobody waits, the existing holder is returned with
    /// `resumed = true` so a lone active user keeps being retried.
    pub fn next(&self) -> Result<Option<Allocation>> {
        let holder = self
            .store
            .users_by_status(UserStatus::InProgress)?
            .into_iter()
            .next();
        let waiting = self.store.users_by_status(UserStatus::Waiting)?;

        let Some(holder) = holder else {
            let Some(first) = waiting.into_iter().next() else {
                return Ok(None);
            };
            self.store.hand_over(None, first.id)?;
            debug!(user_id = first.id, "carousel: initial token holder");
            return Ok(Some(Allocation {
                user: User {
                    status: UserStatus::InProgress,
                    ..first
                },
                resumed: false,
            }));
        };

        let chosen = waiting
            .iter()
            .find(|u| u.id > holder.id)
            .or_else(|| waiting.first())
            .cloned();

        match chosen {
            Some(next) => {
                self.store.hand_over(Some(holder.id), next.id)?;
                debug!(from = holder.id, to = next.id, "carousel: token handed over");
                Ok(Some(Allocation {
                    user: User {
                        status: UserStatus::InProgress,
                        ..next
                    },
                    resumed: false,
                }))
            }
            None => Ok(Some(Allocation {
                user: holder,
                resumed: true,
            })),
        }
    }

    /// Put the holder back in the queue. False when the user does not
    /// currently hold the token.
    pub fn release(&self, id: UserId) -> Result<bool> {
        self.store
            .set_status_if(id, UserStatus::InProgress, UserStatus::Waiting)
    }

    /// Take the holder out of the rotation after a completed application.
    pub fn mark_applied(&self, id: UserId) -> Result<bool> {
        self.store
            .set_status_if(id, UserStatus::InProgress, UserStatus::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::NewUser;

    fn carousel_with(n: usize) -> (Carousel, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for i in 0..n {
            store
                .register_user(NewUser {
                    login: Some(format!("user{i}")),
                    password: Some("pw".into()),
                    ..NewUser::default()
                })
                .unwrap();
        }
        (Carousel::new(store.clone()), store)
    }

    fn in_progress_count(store: &MemoryStore) -> usize {
        store.users_by_status(UserStatus::InProgress).unwrap().len()
    }

    #[test]
    fn test_empty_store_allocates_nothing() {
        let (carousel, _) = carousel_with(0);
        assert!(carousel.next().unwrap().is_none());
    }

    #[test]
    fn test_visits_every_user_once_with_single_wraparound() {
        let (carousel, store) = carousel_with(4);
        let mut visited = Vec::new();
        for _ in 0..4 {
            let alloc = carousel.next().unwrap().unwrap();
            assert!(!alloc.resumed);
            visited.push(alloc.user.id);
            assert_eq!(in_progress_count(&store), 1);
        }
        assert_eq!(visited, vec![1, 2, 3, 4]);

        // Next round wraps back to the smallest id.
        let alloc = carousel.next().unwrap().unwrap();
        assert_eq!(alloc.user.id, 1);
    }

    #[test]
    fn test_lone_holder_is_resumed_not_starved() {
        let (carousel, store) = carousel_with(1);
        let first = carousel.next().unwrap().unwrap();
        assert!(!first.resumed);
        let again = carousel.next().unwrap().unwrap();
        assert!(again.resumed);
        assert_eq!(again.user.id, first.user.id);
        assert_eq!(in_progress_count(&store), 1);
    }

    #[test]
    fn test_release_requires_token_held() {
        let (carousel, store) = carousel_with(2);
        assert!(!carousel.release(1).unwrap());
        let alloc = carousel.next().unwrap().unwrap();
        assert!(carousel.release(alloc.user.id).unwrap());
        assert_eq!(in_progress_count(&store), 0);
        // Releasing twice is a no-op.
        assert!(!carousel.release(alloc.user.id).unwrap());
    }

    #[test]
    fn test_skips_non_waiting_users() {
        let (carousel, store) = carousel_with(3);
        let first = carousel.next().unwrap().unwrap();
        assert!(carousel.mark_applied(first.user.id).unwrap());

        // User 1 applied; rotation now alternates between 2 and 3.
        let ids: Vec<_> = (0..4)
            .map(|_| carousel.next().unwrap().unwrap().user.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 2, 3]);
        assert_eq!(in_progress_count(&store), 1);
    }

    #[test]
    fn test_handover_after_release_restarts_from_smallest() {
        let (carousel, _) = carousel_with(3);
        let alloc = carousel.next().unwrap().unwrap();
        assert_eq!(alloc.user.id, 1);
        carousel.release(1).unwrap();
        // No holder any more; the smallest waiting id becomes holder again.
        let alloc = carousel.next().unwrap().unwrap();
        assert_eq!(alloc.user.id, 1);
        assert!(!alloc.resumed);
    }
}
