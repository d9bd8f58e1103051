// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Autonomous coding orchestrator: watches task sources, claims tickets, and
/// drives LLM agent workers through a build → verify → push loop.
#[derive(Parser, Debug)]
#[command(name = "foreman", version, about)]
pub struct Cli {
    /// Explicit config file merged over the discovered layers.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane: poll work sources, claim items, spawn workers.
    ///
    /// With `leader.mode = file` or `kubernetes`, multiple replicas can run
    /// this command; exactly one of them drives the loop at a time.
    Orchestrate,

    /// Run one agent turn against the configured model.
    ///
    /// This is the LLM seam used inside a worker: the build/verify driver
    /// calls it with a prompt and reads the response from stdout.
    Agent {
        /// Prompt text; read from stdin when omitted.
        prompt: Option<String>,

        /// Stream response fragments to stdout as they arrive.
        #[arg(long)]
        stream: bool,

        /// Project label overriding `state.project` from config.
        #[arg(long)]
        project: Option<String>,
    },

    /// Print the merged configuration and exit.
    ShowConfig,

    /// List supported model drivers.
    ListProviders {
        /// Machine-readable output.
        #[arg(long)]
        json: bool,
    },
}
