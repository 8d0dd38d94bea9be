//! CLI tool extracting one PDF page to JSON
//!
//! Usage: extract-page <pdf_path> [page_number]
//!
//! Exactly one JSON document is written to stdout. Progress goes to stderr
//! through the logger (`RUST_LOG` overrides the default `info` level).

use env_logger::Env;
use pdf_page_extract::{process_page, Failure, Response};
use std::env;
use std::path::Path;
use std::process;

const PROGRAM: &str = "extract-page";

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let response = run(&args);

    match response.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }

    process::exit(response.exit_code());
}

fn run(args: &[String]) -> Response {
    if args.len() < 2 {
        return Failure::usage(PROGRAM).into();
    }

    let pdf_path = &args[1];
    let page_index = match args.get(2) {
        None => 0,
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => return Failure::invalid_page_number(raw).into(),
        },
    };

    if !Path::new(pdf_path).exists() {
        return Failure::file_not_found(pdf_path).into();
    }

    process_page(pdf_path, page_index)
}
