use crate::error::{AppError, AppResult};
use crate::feed::{ChangeEvent, ChangeRecord};
use crate::models::RequestResponse;
use crate::services::RequestService;

/// State held by one worker connection: the request that worker is currently
/// driving. Nothing here is persisted; dropping the session loses only the
/// pointer, never a request.
pub struct WorkerSession {
    requests: RequestService,
    current: Option<RequestResponse>,
}

impl WorkerSession {
    pub fn new(requests: RequestService) -> Self {
        Self {
            requests,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&RequestResponse> {
        self.current.as_ref()
    }

    /// Submits credentials and tracks the created request.
    pub async fn submit(&mut self, phone: &str, access_code: &str) -> AppResult<&RequestResponse> {
        if let Some(current) = &self.current {
            return Err(AppError::ValidationError(format!(
                "Session is already tracking request {}",
                current.id
            )));
        }
        let request = self.requests.submit(phone, access_code).await?;
        log::info!("Worker session now tracking request {}", request.id);
        Ok(self.current.insert(request))
    }

    pub async fn mark_sms_sent(&mut self) -> AppResult<&RequestResponse> {
        let id = self.current_id()?;
        let request = self.requests.mark_sms_sent(id).await?;
        Ok(self.current.insert(request))
    }

    /// Reloads the tracked request from the store.
    pub async fn refresh(&mut self) -> AppResult<&RequestResponse> {
        let id = self.current_id()?;
        let request = self.requests.get(id).await?;
        Ok(self.current.insert(request))
    }

    /// Applies a feed event if it concerns the tracked request and is not
    /// older than the local copy. Returns true when the local copy changed.
    pub fn observe(&mut self, event: &ChangeEvent) -> bool {
        let ChangeRecord::Request(incoming) = &event.record else {
            return false;
        };
        match &mut self.current {
            Some(current) if current.id == incoming.id && incoming.updated_at >= current.updated_at => {
                if current == incoming {
                    return false;
                }
                *current = incoming.clone();
                true
            }
            _ => false,
        }
    }

    /// Stops tracking without touching the stored request.
    pub fn reset(&mut self) -> Option<RequestResponse> {
        self.current.take()
    }

    fn current_id(&self) -> AppResult<i64> {
        self.current
            .as_ref()
            .map(|r| r.id)
            .ok_or_else(|| AppError::ValidationError("No request is being tracked".to_string()))
    }
}
