//! Job registry: every job the binary can launch, built from configuration.

pub mod add_passes;
pub mod class_notifications;
pub mod expire_passes;

use crate::batch::Job;
use crate::config::Config;
use crate::notifier::NotificationSender;
use clap::ValueEnum;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum JobName {
    ExpirePasses,
    AddPasses,
    ClassNotifications,
}

impl JobName {
    pub const ALL: [JobName; 3] = [
        JobName::ExpirePasses,
        JobName::AddPasses,
        JobName::ClassNotifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::ExpirePasses => expire_passes::JOB_NAME,
            JobName::AddPasses => add_passes::JOB_NAME,
            JobName::ClassNotifications => class_notifications::JOB_NAME,
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the job registered under `name`.
pub fn build(name: JobName, cfg: &Config, sender: Arc<dyn NotificationSender>) -> Job {
    match name {
        JobName::ExpirePasses => expire_passes::job(&cfg.jobs.expire_passes),
        JobName::AddPasses => add_passes::job(&cfg.jobs.add_passes),
        JobName::ClassNotifications => {
            class_notifications::job(&cfg.jobs.class_notifications, sender)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use anyhow::Result;
    use async_trait::async_trait;

    struct NoopSender;

    #[async_trait]
    impl NotificationSender for NoopSender {
        async fn send(&self, _uuid: &str, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_names_match_jobs() {
        let cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        for name in JobName::ALL {
            let job = build(name, &cfg, Arc::new(NoopSender));
            assert_eq!(job.name(), name.as_str());
            assert_eq!(JobName::from_str(name.as_str(), false).ok(), Some(name));
        }
    }

    #[test]
    fn notification_job_runs_add_then_send() {
        let cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        let job = build(JobName::ClassNotifications, &cfg, Arc::new(NoopSender));
        assert_eq!(
            job.step_names(),
            vec![
                class_notifications::ADD_STEP_NAME,
                class_notifications::SEND_STEP_NAME
            ]
        );
    }
}
