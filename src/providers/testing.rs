//! Scripted transport for exercising adapters without a network.
//!
//! Responses are registered against a URL fragment and handed out in order;
//! the last response for a fragment is reused once the queue is down to one.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::core::error::ProviderError;

use super::http::{HttpRequest, HttpResponse, HttpTransport};

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<(String, VecDeque<ScriptedReply>)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

#[derive(Clone)]
enum ScriptedReply {
    Response(HttpResponse),
    Failure(ProviderError),
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for any URL containing `fragment`.
    pub fn respond(&self, fragment: &str, response: HttpResponse) {
        self.push(fragment, ScriptedReply::Response(response));
    }

    /// Queues a transport-level failure for any URL containing `fragment`.
    pub fn fail(&self, fragment: &str, error: ProviderError) {
        self.push(fragment, ScriptedReply::Failure(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or(0)
    }

    /// Number of recorded requests whose URL contains `fragment`.
    pub fn count_matching(&self, fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }

    fn push(&self, fragment: &str, reply: ScriptedReply) {
        if let Ok(mut routes) = self.routes.lock() {
            match routes.iter_mut().find(|(existing, _)| existing == fragment) {
                Some((_, queue)) => queue.push_back(reply),
                None => routes.push((fragment.to_string(), VecDeque::from([reply]))),
            }
        }
    }
}

impl HttpTransport for ScriptedTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let mut routes = self
            .routes
            .lock()
            .map_err(|err| ProviderError::TransportFailure(format!("script lock poisoned: {err}")))?;
        // Longest fragment first so "/orders/status/" beats "/orders/".
        let mut candidates: Vec<&mut (String, VecDeque<ScriptedReply>)> = routes
            .iter_mut()
            .filter(|(fragment, queue)| request.url.contains(fragment.as_str()) && !queue.is_empty())
            .collect();
        candidates.sort_by_key(|(fragment, _)| std::cmp::Reverse(fragment.len()));
        let Some((_, queue)) = candidates.into_iter().next() else {
            return Err(ProviderError::TransportFailure(format!(
                "no scripted response for {}",
                request.url
            )));
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(ScriptedReply::Response(response)) => Ok(response),
            Some(ScriptedReply::Failure(error)) => Err(error),
            None => Err(ProviderError::TransportFailure(format!(
                "no scripted response for {}",
                request.url
            ))),
        }
    }
}
