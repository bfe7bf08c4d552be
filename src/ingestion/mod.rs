pub mod lolesports;
pub mod live;
pub mod pandascore;
pub mod rate_limit;
pub mod results;
pub mod retry;
pub mod schedule;

pub use live::LiveStream;
pub use lolesports::LolEsportsClient;
pub use pandascore::PandaScoreClient;
pub use results::ResultsStream;
pub use schedule::ScheduleStream;
