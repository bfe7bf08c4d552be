use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::pandascore::PandaScoreClient;
use crate::bus::EventBus;
use crate::model::{normalize_match, Envelope, EventKind, NormalizedMatch};

#[derive(Clone, Copy)]
enum ScheduleList {
    Upcoming,
    Running,
}

impl ScheduleList {
    fn label(&self) -> &'static str {
        match self {
            ScheduleList::Upcoming => "upcoming",
            ScheduleList::Running => "running",
        }
    }
}

/// Polls upcoming and running matches and publishes schedule upserts.
pub struct ScheduleStream {
    client: Arc<PandaScoreClient>,
    bus: EventBus,
    poll_interval: Duration,
    pagesize: u32,
    leagues_whitelist: Vec<String>,
}

impl ScheduleStream {
    pub fn new(
        client: Arc<PandaScoreClient>,
        bus: EventBus,
        poll_interval: Duration,
        pagesize: u32,
        leagues_whitelist: Vec<String>,
    ) -> Self {
        ScheduleStream {
            client,
            bus,
            poll_interval,
            pagesize,
            leagues_whitelist,
        }
    }

    pub async fn run(self) {
        loop {
            if let Err(e) = self.tick().await {
                error!("Schedule poll failed: {:#}", e);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One polling pass: drain upcoming then running. Match ids are
    /// de-duplicated within the tick, so a match straddling both lists is
    /// published once (first observation wins).
    pub(crate) async fn tick(&self) -> Result<()> {
        let mut seen: HashSet<i64> = HashSet::new();
        self.drain(ScheduleList::Upcoming, &mut seen).await?;
        self.drain(ScheduleList::Running, &mut seen).await?;
        Ok(())
    }

    async fn drain(&self, list: ScheduleList, seen: &mut HashSet<i64>) -> Result<()> {
        let mut page = 1u32;
        loop {
            let matches = match list {
                ScheduleList::Upcoming => {
                    self.client
                        .list_upcoming_matches(page, self.pagesize)
                        .await?
                }
                ScheduleList::Running => {
                    self.client.list_running_matches(page, self.pagesize).await?
                }
            };
            if matches.is_empty() {
                break;
            }
            let full_page = matches.len() as u32 >= self.pagesize;
            for raw in &matches {
                let Some(norm) = normalize_match(raw) else {
                    continue;
                };
                if !seen.insert(norm.id) {
                    continue;
                }
                if !self.league_allowed(&norm) {
                    continue;
                }
                self.bus
                    .publish(Envelope::for_match(EventKind::ScheduleUpsert, &norm));
            }
            if !full_page {
                break;
            }
            page += 1;
        }
        debug!("schedule poll: drained {} (pages={})", list.label(), page);
        Ok(())
    }

    fn league_allowed(&self, m: &NormalizedMatch) -> bool {
        if self.leagues_whitelist.is_empty() {
            return true;
        }
        m.league_slug
            .as_deref()
            .is_some_and(|slug| self.leagues_whitelist.iter().any(|w| w == slug))
    }
}
