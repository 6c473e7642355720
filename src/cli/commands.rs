use clap::{Args, Subcommand};

/// Where the gateway lives and which key signs requests.
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Gateway base URL
    #[arg(long, env = "LEASEGATE_SERVER", default_value = "http://127.0.0.1:4929")]
    pub server: String,

    /// Key id used to sign requests
    #[arg(long, env = "LEASEGATE_KEY_ID")]
    pub key_id: Option<String>,

    /// Secret for the signing key
    #[arg(long, env = "LEASEGATE_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
}

#[derive(Subcommand)]
pub enum LeaseCommands {
    /// Acquire a lease on a path
    Acquire {
        /// Repository name
        #[arg(long, short)]
        repository: String,

        /// Path within the repository (defaults to the whole repository)
        #[arg(long, short, default_value = "/")]
        path: String,

        /// Print only the lease token
        #[arg(long)]
        quiet: bool,
    },

    /// Commit a payload under a lease and release it
    Commit {
        /// Lease token
        token: String,

        /// Reference to the payload to publish
        #[arg(long)]
        payload: String,
    },

    /// Release a lease without publishing anything
    Cancel {
        /// Lease token
        token: String,
    },

    /// Show a lease
    Show {
        /// Lease token
        token: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List outstanding leases
    List {
        /// Only leases in this repository
        #[arg(long, short)]
        repository: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
