use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::{
    error::{AppError, Result},
    models::{Vote, VoteTarget, VoteType},
    store::{
        DocumentStore, StoreTransaction, TransactionBody, delete_collection, encode,
        run_transaction,
    },
};

/// Like/dislike counters of a post or comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteCounters {
    pub likes: i64,
    pub dislikes: i64,
}

impl VoteCounters {
    fn adjust(&mut self, vote_type: VoteType, delta: i64) {
        let counter = match vote_type {
            VoteType::Like => &mut self.likes,
            VoteType::Dislike => &mut self.dislikes,
        };
        *counter = (*counter + delta).max(0);
    }

    fn to_fields(self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(VoteType::Like.counter_field().into(), json!(self.likes));
        fields.insert(VoteType::Dislike.counter_field().into(), json!(self.dislikes));
        fields
    }
}

/// Applies one toggle to the counters and returns the user's resulting vote.
///
/// * no vote: the requested type is recorded
/// * same type again: the vote is withdrawn
/// * other type: the vote switches, moving one count across
pub fn apply_toggle(
    counters: VoteCounters,
    current: Option<VoteType>,
    requested: VoteType,
) -> (VoteCounters, Option<VoteType>) {
    let mut next = counters;
    match current {
        None => {
            next.adjust(requested, 1);
            (next, Some(requested))
        }
        Some(existing) if existing == requested => {
            next.adjust(requested, -1);
            (next, None)
        }
        Some(existing) => {
            next.adjust(requested, 1);
            next.adjust(existing, -1);
            (next, Some(requested))
        }
    }
}

struct ToggleVote<'a> {
    target: &'a VoteTarget,
    user_id: &'a str,
    vote_type: VoteType,
}

#[async_trait]
impl TransactionBody for ToggleVote<'_> {
    type Output = Option<VoteType>;

    async fn run(&self, tx: &mut dyn StoreTransaction) -> Result<Self::Output> {
        let target_path = self.target.doc_path();
        let vote_path = self.target.vote_path(self.user_id);

        let target = tx
            .get(&target_path)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} not found", self.target.kind())))?;
        let counters = VoteCounters {
            likes: target.int_field(VoteType::Like.counter_field()).max(0),
            dislikes: target.int_field(VoteType::Dislike.counter_field()).max(0),
        };

        let current = tx
            .get(&vote_path)
            .await?
            .map(|doc| doc.decode::<Vote>())
            .transpose()?
            .map(|vote| vote.vote_type);

        let (next, result) = apply_toggle(counters, current, self.vote_type);

        tx.update(&target_path, next.to_fields());
        match result {
            Some(vote_type) => {
                let vote = Vote {
                    user_id: self.user_id.to_string(),
                    vote_type,
                    created_at: Utc::now(),
                };
                tx.set(&vote_path, encode(&vote)?);
            }
            None => tx.delete(&vote_path),
        }

        Ok(result)
    }
}

/// Toggles `user_id`'s vote on `target` atomically, returning the vote the user
/// holds afterwards.
pub async fn toggle_vote(
    store: &dyn DocumentStore,
    target: &VoteTarget,
    user_id: &str,
    vote_type: VoteType,
) -> Result<Option<VoteType>> {
    target.ensure_valid()?;
    if user_id.trim().is_empty() {
        return Err(AppError::Validation("Missing user id".to_string()));
    }

    let body = ToggleVote {
        target,
        user_id,
        vote_type,
    };
    let result = run_transaction(store, &body).await?;

    tracing::debug!(
        path = %target.doc_path(),
        user_id,
        vote = ?result,
        "vote toggled"
    );
    Ok(result)
}

pub async fn toggle_post_vote(
    store: &dyn DocumentStore,
    post_id: &str,
    user_id: &str,
    vote_type: VoteType,
) -> Result<Option<VoteType>> {
    toggle_vote(store, &VoteTarget::post(post_id), user_id, vote_type).await
}

pub async fn toggle_comment_vote(
    store: &dyn DocumentStore,
    post_id: &str,
    comment_id: &str,
    user_id: &str,
    vote_type: VoteType,
) -> Result<Option<VoteType>> {
    toggle_vote(
        store,
        &VoteTarget::comment(post_id, comment_id),
        user_id,
        vote_type,
    )
    .await
}

pub async fn get_user_vote(
    store: &dyn DocumentStore,
    target: &VoteTarget,
    user_id: &str,
) -> Result<Option<VoteType>> {
    target.ensure_valid()?;
    let vote = match store.get(&target.vote_path(user_id)).await? {
        Some(doc) => Some(doc.decode::<Vote>()?),
        None => None,
    };
    Ok(vote.map(|vote| vote.vote_type))
}

/// Removes every vote document of a votes collection.
pub async fn delete_votes(store: &dyn DocumentStore, votes_collection: &str) -> Result<usize> {
    delete_collection(store, votes_collection).await
}
