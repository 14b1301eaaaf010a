//! Request scripts
//!
//! A script declares processes and threads by name, then a sequence of
//! steps, each issued by one thread:
//!
//! ```toml
//! [[process]]
//! name = "app"
//!
//! [[thread]]
//! name = "main"
//! process = "app"
//!
//! [[step]]
//! thread = "main"
//! request = { request = "create_completion", name = "\\BaseNamedObjects\\port", access = "GENERIC_ALL" }
//! expect = "Success"
//! ```
//!
//! Steps run one after another on the calling thread, so a `select`
//! without a timeout on an unsignaled object never returns.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use uk_kobject::{ProcessId, Status, ThreadId};
use uk_server::{Reply, Request, Server};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default, rename = "process")]
    pub processes: Vec<ProcessDecl>,
    #[serde(default, rename = "thread")]
    pub threads: Vec<ThreadDecl>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessDecl {
    pub name: String,
    pub parent: Option<String>,
    #[serde(default)]
    pub inherit: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadDecl {
    pub name: String,
    pub process: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminate {
    Thread,
    Process,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub thread: String,
    pub request: Option<Request>,
    /// Terminate the step's thread or its whole process instead
    pub terminate: Option<Terminate>,
    /// Status the request must produce
    pub expect: Option<Status>,
}

/// Result of one step
#[derive(Debug)]
pub struct Outcome {
    pub index: usize,
    pub thread: String,
    pub action: String,
    pub status: Status,
    pub reply: Reply,
    pub expected: Option<Status>,
}

impl Outcome {
    pub fn as_expected(&self) -> bool {
        self.expected.map_or(true, |expected| expected == self.status)
    }
}

impl Script {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("Failed to parse script")
    }

    /// Create the declared processes and threads, then run every step
    pub fn run(&self, server: &Server) -> anyhow::Result<Vec<Outcome>> {
        let mut processes: HashMap<&str, ProcessId> = HashMap::new();
        for decl in &self.processes {
            let parent = decl
                .parent
                .as_deref()
                .map(|name| processes.get(name).copied().ok_or_else(|| anyhow!("Unknown parent process `{}`", name)))
                .transpose()?;
            let pid = server
                .new_process(parent, decl.inherit)
                .with_context(|| format!("Failed to start process `{}`", decl.name))?;
            log::info!("process `{}` is {}", decl.name, pid);
            processes.insert(&decl.name, pid);
        }

        let mut threads: HashMap<&str, ThreadId> = HashMap::new();
        for decl in &self.threads {
            let pid = *processes
                .get(decl.process.as_str())
                .ok_or_else(|| anyhow!("Thread `{}` names unknown process `{}`", decl.name, decl.process))?;
            let tid = server
                .new_thread(pid)
                .with_context(|| format!("Failed to start thread `{}`", decl.name))?;
            log::info!("thread `{}` is {}", decl.name, tid);
            threads.insert(&decl.name, tid);
        }

        let mut outcomes = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let tid = *threads
                .get(step.thread.as_str())
                .ok_or_else(|| anyhow!("Step {} names unknown thread `{}`", index, step.thread))?;

            let (action, response) = match (&step.request, step.terminate) {
                (Some(request), None) => (request.name().to_string(), server.handle_request(tid, request)),
                (None, Some(Terminate::Thread)) => {
                    server.terminate_thread(tid)?;
                    ("terminate_thread".to_string(), uk_server::Response::ok(Reply::None))
                }
                (None, Some(Terminate::Process)) => {
                    let pid = server.thread(tid)?.process().id();
                    server.terminate_process(pid)?;
                    ("terminate_process".to_string(), uk_server::Response::ok(Reply::None))
                }
                _ => bail!("Step {} needs exactly one of `request` or `terminate`", index),
            };

            outcomes.push(Outcome {
                index,
                thread: step.thread.clone(),
                action,
                status: response.status,
                reply: response.reply,
                expected: step.expect,
            });
        }
        Ok(outcomes)
    }
}
