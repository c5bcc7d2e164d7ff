use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "clinicpulse", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect and print live updates until Ctrl-C
    Listen {
        /// Bearer token of the signed-in user
        #[arg(short, long, env = "CLINICPULSE_TOKEN", hide_env_values = true)]
        token: String,

        /// Portal role; admins also receive emergency alerts
        #[arg(short, long, value_enum, default_value_t = RoleArg::Doctor)]
        role: RoleArg,

        /// Doctor whose schedule slots to follow
        #[arg(short, long)]
        doctor: Option<i64>,

        /// Schedule dates to follow (yyyy-MM-dd, repeatable; defaults to today)
        #[arg(long = "date", value_name = "DATE")]
        dates: Vec<NaiveDate>,
    },

    /// Print the topic a scope subscribes to
    Topic {
        #[arg(value_enum)]
        kind: TopicKind,

        #[arg(short, long, required_if_eq("kind", "slots"))]
        doctor: Option<i64>,

        #[arg(long, required_if_eq("kind", "slots"))]
        date: Option<NaiveDate>,
    },

    /// List stored notifications
    Notifications {
        /// Only unread entries
        #[arg(short, long)]
        unread: bool,
    },

    /// Mark every stored notification as read
    MarkRead,

    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleArg {
    Admin,
    Doctor,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicKind {
    Slots,
    Emergency,
    Personal,
}
