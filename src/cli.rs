// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "parley",
    version,
    about = "Multi-tenant AI-agent serving platform",
    long_about = "Parley mediates conversations between end users and LLM providers: \
                  persistent threads, budgets, capabilities, durable jobs, and \
                  streaming over SSE/WebSocket."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP/WebSocket gateway (default).
    Serve,
    /// Run a job worker process (requires AGENT_REDIS_URL).
    Worker,
    /// Create the database schema and exit.
    InitDb,
    /// Mint a bearer token for local testing.
    IssueToken {
        /// User id to embed in the token.
        #[arg(long, default_value = "default")]
        user: String,
        /// Role: "user" or "admin".
        #[arg(long, default_value = "user")]
        role: String,
    },
}
