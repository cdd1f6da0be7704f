//! Submission lifecycle: validate, persist, run actions, record the result,
//! notify.

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::actions::ActionPipeline;
use crate::email::{EmailError, EmailService};
use crate::models::{ProcessingResult, Submission};
use crate::notify::NotificationDispatcher;
use crate::schema::{FormSchema, FormSummary, SchemaRegistry};
use crate::store::{Page, StoreError, SubmissionStore};
use crate::validation::{ValidationError, Validator};

#[derive(Debug, Error)]
pub enum FormError {
    #[error("form '{0}' not found")]
    UnknownForm(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Email(#[from] EmailError),
}

impl FormError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownForm(_) | Self::Store(StoreError::NotFound(_))
        )
    }
}

/// A stored submission and the result of its first pipeline run.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub submission: Submission,
    pub result: ProcessingResult,
}

pub struct FormService {
    registry: SchemaRegistry,
    validator: Validator,
    store: SubmissionStore,
    pipeline: ActionPipeline,
    email: EmailService,
    notifier: NotificationDispatcher,
}

impl FormService {
    pub fn new(
        registry: SchemaRegistry,
        validator: Validator,
        store: SubmissionStore,
        pipeline: ActionPipeline,
        email: EmailService,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            registry,
            validator,
            store,
            pipeline,
            email,
            notifier,
        }
    }

    pub fn list_forms(&self) -> Vec<FormSummary> {
        self.registry.summaries()
    }

    pub fn schema(&self, form_id: &str) -> Result<Arc<FormSchema>, FormError> {
        self.registry
            .get(form_id)
            .ok_or_else(|| FormError::UnknownForm(form_id.to_string()))
    }

    /// Accepts one submission. Nothing is stored when validation fails.
    ///
    /// Action failures do not fail the call; they are reported in the
    /// receipt's result and in the stored `error` column.
    pub async fn submit(
        &self,
        form_id: &str,
        data: Map<String, Value>,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<SubmissionReceipt, FormError> {
        let schema = self.schema(form_id)?;
        let mut submission = Submission::new(form_id, data, ip_address, user_agent);
        self.validator.validate(&submission, &schema)?;

        self.store.create(&mut submission).await?;
        info!(form_id, submission_id = %submission.id, "submission accepted");

        let result = self.pipeline.run(&submission, &schema).await;
        submission.apply_result(&result);
        if let Err(err) = self.store.update(&submission).await {
            error!(
                submission_id = %submission.id,
                error = %err,
                "failed to record processing result"
            );
        }

        self.notifier.dispatch(&schema, &submission, &result);

        Ok(SubmissionReceipt { submission, result })
    }

    /// Re-runs every action of a stored submission from a reset state.
    pub async fn reprocess(&self, submission_id: &str) -> Result<ProcessingResult, FormError> {
        let mut submission = self.store.get(submission_id).await?;
        let schema = self.schema(&submission.form_id)?;

        submission.reset_processing();
        let result = self.pipeline.run(&submission, &schema).await;
        submission.apply_result(&result);
        self.store.update(&submission).await?;

        info!(
            submission_id,
            form_id = %submission.form_id,
            success = result.success,
            "submission reprocessed"
        );
        Ok(result)
    }

    pub async fn list_submissions(
        &self,
        form_id: Option<&str>,
        page: Page,
    ) -> Result<Vec<Submission>, FormError> {
        Ok(self.store.list(form_id, page).await?)
    }

    /// Like [`Self::list_submissions`] but rejects unknown form ids.
    pub async fn form_submissions(
        &self,
        form_id: &str,
        page: Page,
    ) -> Result<Vec<Submission>, FormError> {
        self.schema(form_id)?;
        self.list_submissions(Some(form_id), page).await
    }

    pub async fn get(&self, submission_id: &str) -> Result<Submission, FormError> {
        Ok(self.store.get(submission_id).await?)
    }

    pub async fn delete(&self, submission_id: &str) -> Result<(), FormError> {
        self.store.delete(submission_id).await?;
        info!(submission_id, "submission deleted");
        Ok(())
    }

    /// Manual approval path: sends the internal-testing welcome email for a
    /// stored submission to `to`.
    pub async fn send_welcome(&self, submission_id: &str, to: &str) -> Result<(), FormError> {
        let submission = self.store.get(submission_id).await?;
        let schema = self.schema(&submission.form_id)?;
        self.email.send_welcome(&submission, &schema, to).await?;
        Ok(())
    }
}
