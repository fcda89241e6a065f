mod agent;
mod agent_key;
mod asset;
mod job;

pub use agent::{Agent, AgentStatus};
pub use agent_key::{AgentKey, AgentKeyStatus};
pub use asset::{HashFile, Wordlist};
pub use job::{Job, JobStatus};
