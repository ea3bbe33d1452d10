mod latest_page_poll;

pub(crate) use latest_page_poll::LatestPagePoll;
