//! Durable counter of outstanding concurrent branches per `(process instance, ref id)`.
//!
//! Fan-out inserts one token per spawned branch; fan-in removes one per arriving branch. The
//! merge condition of a gateway, loop or multi-instance activity is met when the live count of
//! its merge key reaches the expected value (usually zero).

use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, ErrorContext, Result};
use crate::model::token::Token;
use crate::runtime::notifier::{ChangeKind, ChangeNotifier};
use crate::store::{Direction, Entity, Filter, QueryOptions, TokenStore, delete_matching};

fn merge_key(process_instance_id: u64, ref_id: u64) -> Filter {
    Filter::new()
        .eq("process_instance_id", process_instance_id)
        .eq("ref_id", ref_id)
}

#[derive(Clone)]
pub struct TokenLedger {
    tokens: Arc<dyn TokenStore>,
    notifier: ChangeNotifier,
    page_size: usize,
}

impl TokenLedger {
    pub fn new(tokens: Arc<dyn TokenStore>, notifier: ChangeNotifier, page_size: usize) -> Self {
        Self {
            tokens,
            notifier,
            page_size,
        }
    }

    pub async fn create_token(
        &self,
        process_instance_id: u64,
        ref_id: u64,
        parent_ref_id: Option<u64>,
    ) -> Result<Token> {
        let token = self
            .tokens
            .insert(Token::new(process_instance_id, ref_id, parent_ref_id))
            .await
            .map_err(EngineError::creation(
                Token::KIND,
                ErrorContext::default().process_instance(process_instance_id),
            ))?;
        debug!(process_instance_id, ref_id, token_id = token.id, "Token created");
        self.notifier.notify(ChangeKind::Created, &token);
        Ok(token)
    }

    /// Inserts `n` tokens under the same merge key.
    pub async fn create_tokens(
        &self,
        process_instance_id: u64,
        ref_id: u64,
        parent_ref_id: Option<u64>,
        n: usize,
    ) -> Result<Vec<Token>> {
        let mut created = Vec::with_capacity(n);
        for _ in 0..n {
            created.push(
                self.create_token(process_instance_id, ref_id, parent_ref_id)
                    .await?,
            );
        }
        Ok(created)
    }

    pub async fn get_number_of_token(&self, process_instance_id: u64, ref_id: u64) -> Result<usize> {
        self.tokens
            .count(&merge_key(process_instance_id, ref_id))
            .await
            .map_err(EngineError::search(Token::KIND))
    }

    /// Live tokens of a process instance across every merge key.
    pub async fn get_number_of_tokens(&self, process_instance_id: u64) -> Result<usize> {
        self.tokens
            .count(&Filter::new().eq("process_instance_id", process_instance_id))
            .await
            .map_err(EngineError::search(Token::KIND))
    }

    /// The single live token of a merge key. Zero or several live tokens mean the branch graph
    /// is broken.
    pub async fn get_token(&self, process_instance_id: u64, ref_id: u64) -> Result<Token> {
        let options = QueryOptions::new(0, 2).filter(merge_key(process_instance_id, ref_id));
        let mut found = self
            .tokens
            .list(&options)
            .await
            .map_err(EngineError::search(Token::KIND))?;
        if found.len() != 1 {
            let found = if found.is_empty() {
                0
            } else {
                self.get_number_of_token(process_instance_id, ref_id).await?
            };
            return Err(EngineError::BrokenMerge {
                process_instance_id,
                ref_id,
                found,
            });
        }
        Ok(found.remove(0))
    }

    pub async fn get_tokens(&self, process_instance_id: u64, options: &QueryOptions) -> Result<Vec<Token>> {
        let options = options
            .clone()
            .filter(Filter::new().eq("process_instance_id", process_instance_id));
        self.tokens
            .list(&options)
            .await
            .map_err(EngineError::search(Token::KIND))
    }

    pub async fn delete_token(&self, token: &Token) -> Result<()> {
        let context = ErrorContext::default().process_instance(token.process_instance_id);
        let removed = self
            .tokens
            .delete(token.id)
            .await
            .map_err(EngineError::deletion(Token::KIND, context))?;
        if !removed {
            return Err(EngineError::not_found(Token::KIND, token.id));
        }
        debug!(
            process_instance_id = token.process_instance_id,
            ref_id = token.ref_id,
            token_id = token.id,
            "Token deleted"
        );
        self.notifier.notify(ChangeKind::Deleted, token);
        Ok(())
    }

    /// Consumes `n` tokens of the merge key, lowest ids first. Asking for more than are live
    /// fails with `NotFound` (carrying the ref id) and deletes nothing.
    pub async fn delete_tokens(&self, process_instance_id: u64, ref_id: u64, n: usize) -> Result<()> {
        let live = self.get_number_of_token(process_instance_id, ref_id).await?;
        if n > live {
            return Err(EngineError::not_found(Token::KIND, ref_id));
        }
        let options = QueryOptions::new(0, n)
            .filter(merge_key(process_instance_id, ref_id))
            .order_by("id", Direction::Asc);
        let victims = self
            .tokens
            .list(&options)
            .await
            .map_err(EngineError::search(Token::KIND))?;
        if victims.len() < n {
            return Err(EngineError::not_found(Token::KIND, ref_id));
        }
        for token in &victims {
            self.delete_token(token).await?;
        }
        Ok(())
    }

    /// Atomic fan-in: removes one live token of the merge key and returns how many remain.
    /// Concurrent arrivals each observe a distinct remaining count, so exactly one sees zero.
    pub async fn consume(&self, process_instance_id: u64, ref_id: u64) -> Result<usize> {
        let remaining = self
            .tokens
            .consume_token(process_instance_id, ref_id)
            .await
            .map_err(EngineError::deletion(
                Token::KIND,
                ErrorContext::default().process_instance(process_instance_id),
            ))?
            .ok_or(EngineError::BrokenMerge {
                process_instance_id,
                ref_id,
                found: 0,
            })?;
        debug!(process_instance_id, ref_id, remaining, "Token consumed");
        Ok(remaining)
    }

    /// Removes every token of a process instance.
    pub async fn delete_process_tokens(&self, process_instance_id: u64) -> Result<usize> {
        let deleted = delete_matching(
            self.tokens.as_ref(),
            &Filter::new().eq("process_instance_id", process_instance_id),
            self.page_size,
        )
        .await
        .map_err(EngineError::deletion(
            Token::KIND,
            ErrorContext::default().process_instance(process_instance_id),
        ))?;
        debug!(process_instance_id, deleted, "Process tokens deleted");
        Ok(deleted)
    }

    pub async fn delete_all_tokens(&self) -> Result<usize> {
        delete_matching(self.tokens.as_ref(), &Filter::new(), self.page_size)
            .await
            .map_err(EngineError::deletion(Token::KIND, ErrorContext::default()))
    }
}
