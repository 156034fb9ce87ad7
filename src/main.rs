/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use mailshot::{
    cli::Args,
    compose::{Envelope, MessageSource},
    diagnostics::Diagnostics,
    dispatch::{Dispatcher, Job, Report},
    input,
    transport::StdoutTransport,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let diagnostics = match Diagnostics::from_env(args.verbose, args.log_file.as_deref()) {
        Ok(diagnostics) => diagnostics,
        Err(err) => {
            eprintln!("Failed to open log file: {err}");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(&args, &diagnostics).await {
        Ok(report) => {
            let verb = if args.stdout { "Printed" } else { "Sent" };
            eprintln!(
                "{verb} {} cop{} via {} in {} batch{}",
                report.delivered,
                if report.delivered == 1 { "y" } else { "ies" },
                if args.stdout {
                    "stdout".to_string()
                } else {
                    args.relay.to_string()
                },
                report.batches,
                if report.batches == 1 { "" } else { "es" },
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            diagnostics.error(format_args!("{err}"));
            if args.log_file.is_some() {
                eprintln!("{err}");
            }
            ExitCode::FAILURE
        }
    };
    diagnostics.flush();
    code
}

async fn run(args: &Args, diagnostics: &Diagnostics) -> mailshot::Result<Report> {
    if args.pwd.is_some() && args.user.is_none() {
        diagnostics.warn(format_args!("A password was given without --user, not authenticating"));
    }

    let job = args.job();
    if job.concurrency() < args.concurrency as usize {
        diagnostics.debug(format_args!(
            "Concurrency lowered to {} to match the number of copies",
            job.concurrency()
        ));
    }

    match input::piped_stdin(Duration::from_millis(args.stdin_wait)).await? {
        Some(message) => {
            if args.has_composition_options() {
                diagnostics.warn(format_args!(
                    "Sending the message read from standard input, composition options are ignored"
                ));
            }
            dispatch(args, Arc::new(message), job, diagnostics).await
        }
        None => {
            let template = args.template()?;
            for name in template.ignored_headers() {
                diagnostics.warn(format_args!("Header {name:?} is generated and was ignored"));
            }
            diagnostics.debug(format_args!("Composing {:?} messages", template.kind()));
            dispatch(args, Arc::new(template), job, diagnostics).await
        }
    }
}

async fn dispatch<S: MessageSource>(
    args: &Args,
    source: Arc<S>,
    job: Job,
    diagnostics: &Diagnostics,
) -> mailshot::Result<Report> {
    let envelope: Envelope = args.envelope();
    if args.stdout {
        Dispatcher::new(StdoutTransport::new(), envelope, diagnostics)
            .dispatch(source, job)
            .await
    } else {
        diagnostics.info(format_args!(
            "Sending {} copies to {}, {} at a time",
            job.count(),
            args.relay,
            job.concurrency()
        ));
        Dispatcher::new(args.smtp_client(), envelope, diagnostics)
            .dispatch(source, job)
            .await
    }
}
