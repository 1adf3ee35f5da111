//! Shared test doubles for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ticketflow::llm::{GenerativeService, RetryPolicy, RetryingCaller, ServiceError, SlidingWindowLimiter};
use ticketflow::storage::{InMemoryResponseCache, ResponseCache};
use ticketflow::types::CallRequest;

/// Replays scripted outcomes in order, then answers every prompt with
/// `"answer to: <prompt>"`.
#[derive(Default)]
pub struct ScriptedService {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    prompts: Mutex<Vec<String>>,
    invocations: AtomicU32,
}

impl ScriptedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_script(outcomes: Vec<Result<String, ServiceError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeService for ScriptedService {
    async fn invoke(&self, request: &CallRequest) -> Result<String, ServiceError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("answer to: {}", request.prompt)))
    }

    fn service_name(&self) -> &str {
        "scripted"
    }
}

/// Always reports quota exhaustion.
pub struct AlwaysThrottled {
    pub invocations: AtomicU32,
}

impl AlwaysThrottled {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl GenerativeService for AlwaysThrottled {
    async fn invoke(&self, _request: &CallRequest) -> Result<String, ServiceError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(ServiceError::classify("429 RESOURCE_EXHAUSTED: quota exceeded"))
    }
}

/// Caller over an in-memory cache with the default retry policy.
pub fn memory_caller(
    service: Arc<dyn GenerativeService>,
    quota: usize,
    window: Duration,
) -> Arc<RetryingCaller> {
    let limiter = Arc::new(SlidingWindowLimiter::new(quota, window).unwrap());
    let cache: Arc<dyn ResponseCache> = Arc::new(InMemoryResponseCache::new());
    Arc::new(RetryingCaller::new(
        service,
        limiter,
        Some(cache),
        RetryPolicy::default(),
    ))
}
