//! Scripted generation client shared by the integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proofandfit::CandidateItem;
use proofandfit::clients::{GenerationClient, GenerationError, GenerationParams};

#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Return a challenge whose text derives from this key
    Item(&'static str),
    Fail,
    /// Never answer within any sane timeout
    Hang,
}

pub fn item_for(key: &str) -> CandidateItem {
    CandidateItem::new(
        key.to_string(),
        format!("{key} description"),
        format!("{key} answer"),
    )
}

pub struct ScriptedClient {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Duration,
    calls: AtomicUsize,
    temperatures: Mutex<Vec<f32>>,
}

impl ScriptedClient {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            temperatures: Mutex::new(Vec::new()),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new(Vec::new(), step)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn temperatures(&self) -> Vec<f32> {
        self.temperatures.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(
        &self,
        _prompt: &str,
        params: &GenerationParams,
    ) -> Result<CandidateItem, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.temperatures.lock().unwrap().push(params.temperature);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(self.fallback);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match step {
            Step::Item(key) => Ok(item_for(key)),
            Step::Fail => Err(GenerationError::Upstream("503 overloaded".to_string())),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GenerationError::Http("unreachable".to_string()))
            }
        }
    }

    fn provider(&self) -> &str {
        "scripted"
    }
}
