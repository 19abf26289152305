// Test doubles for the transport seams
//
// `ScriptedTransport` answers HTTP calls from per-route queues and records
// every request; `ScriptedRunner` does the same for CLI invocations.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{CollectorError, Result};
use crate::model::{Credentials, ServerTarget};
use crate::transport::{ApiRequest, ApiResponse, CommandRunner, HttpTransport, Method};

#[derive(Clone)]
enum Scripted {
    Reply(ApiResponse),
    Status(u16),
    Refused,
    Stall,
}

struct Route {
    method: Method,
    path: String,
    // The last entry keeps answering once the queue is down to one
    replies: VecDeque<Scripted>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, method: Method, path: &str, reply: Scripted) -> Self {
        {
            let mut routes = self.routes.lock().unwrap();
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.path == path)
            {
                Some(route) => route.replies.push_back(reply),
                None => routes.push(Route {
                    method,
                    path: path.to_string(),
                    replies: VecDeque::from(vec![reply]),
                }),
            }
        }
        self
    }

    /// Answers with a 200 and the given JSON body
    pub fn on(self, method: Method, path: &str, body: Value) -> Self {
        self.push(method, path, Scripted::Reply(ApiResponse::json(body)))
    }

    pub fn on_response(self, method: Method, path: &str, response: ApiResponse) -> Self {
        self.push(method, path, Scripted::Reply(response))
    }

    /// Answers with an error status
    pub fn on_status(self, method: Method, path: &str, status: u16) -> Self {
        self.push(method, path, Scripted::Status(status))
    }

    /// Fails like a refused connection
    pub fn on_refused(self, method: Method, path: &str) -> Self {
        self.push(method, path, Scripted::Refused)
    }

    /// Never answers, like an array that stopped responding mid-session
    pub fn on_stall(self, method: Method, path: &str) -> Self {
        self.push(method, path, Scripted::Stall)
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path_prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path.starts_with(path_prefix))
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push(request.clone());

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            let route = routes
                .iter_mut()
                .find(|r| r.method == request.method && r.path == request.path);
            match route {
                Some(route) if route.replies.len() > 1 => route.replies.pop_front(),
                Some(route) => route.replies.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Status(status)) => Err(CollectorError::Http {
                path: request.path,
                status,
                body: String::new(),
            }),
            Some(Scripted::Refused) => Err(CollectorError::Transport(format!(
                "connection refused: {}",
                request.path
            ))),
            Some(Scripted::Stall) => std::future::pending().await,
            None => Err(CollectorError::Transport(format!(
                "no route for {:?} {}",
                request.method, request.path
            ))),
        }
    }
}

/// CLI fake keyed by a fragment of the argument list (e.g. "getagent")
#[derive(Default)]
pub struct ScriptedRunner {
    outputs: Vec<(String, std::result::Result<String, String>)>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, fragment: &str, stdout: &str) -> Self {
        self.outputs
            .push((fragment.to_string(), Ok(stdout.to_string())));
        self
    }

    pub fn on_failure(mut self, fragment: &str, stderr: &str) -> Self {
        self.outputs
            .push((fragment.to_string(), Err(stderr.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        self.calls.lock().unwrap().push(args.to_vec());
        let joined = args.join(" ");

        match self.outputs.iter().find(|(fragment, _)| joined.contains(fragment.as_str())) {
            Some((_, Ok(stdout))) => Ok(stdout.clone()),
            Some((_, Err(stderr))) => Err(CollectorError::Process {
                program: program.to_string(),
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            }),
            None => Err(CollectorError::Transport(format!("unexpected invocation: {}", joined))),
        }
    }
}

pub fn target(id: &str, storage: &str) -> ServerTarget {
    ServerTarget::new(id, "10.0.0.1", storage)
}

pub fn credentials() -> Credentials {
    Credentials::new("monitor", "secret")
}
