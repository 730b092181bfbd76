pub const MESSAGES_PRODUCED: &str = "stream_agents_messages_produced";
pub const PRODUCE_ERRORS: &str = "stream_agents_produce_errors";
pub const MESSAGES_HANDLED: &str = "stream_agents_messages_handled";
pub const HANDLER_TIME: &str = "stream_agents_handler_time_ms";
pub const HANDLER_ERRORS: &str = "stream_agents_handler_errors";
pub const EMPTY_MESSAGES: &str = "stream_agents_empty_messages";
pub const RECV_ERRORS: &str = "stream_agents_recv_errors";
pub const AGENTS_RUNNING: &str = "stream_agents_agents_running";
pub const AGENTS_STOPPED: &str = "stream_agents_agents_stopped";
