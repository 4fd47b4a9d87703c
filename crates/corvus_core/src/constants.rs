pub mod queues {
    pub const SINGLE: &str = "single";
    pub const MULTI: &str = "multi";
    pub const UNLIMITED: &str = "unlimited";

    pub const ALL: [&str; 3] = [SINGLE, MULTI, UNLIMITED];
}

pub mod streams {
    /// The only stdout name an interactive job may carry.
    pub const STDOUT: &str = "stdout.txt";
    /// The only stderr name an interactive job may carry.
    pub const STDERR: &str = "stderr.txt";
}

pub mod states {
    pub const PENDING: &str = "PENDING";
    pub const RUNNING: &str = "RUNNING";
    pub const DONE: &str = "DONE";
    pub const KILLED: &str = "KILLED";
    pub const ERROR: &str = "ERROR";
    pub const UNKNOWN: &str = "UNKNOWN";
}
