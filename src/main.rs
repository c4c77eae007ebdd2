//! The `synterm` binary: color standard input with a sublime-syntax
//! definition and a sublime-color-scheme, straight to standard output.
//!
//! tip: use with `| less -r`

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

use getopts::Options;
use serde_json::json;

use synterm::highlighting::{scheme_names, ColorScheme, SCHEME_FILE_EXT, SGR_RESET};
use synterm::interpreter::SyntaxHighlighter;
use synterm::parsing::SyntaxSet;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("USAGE: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut opts = Options::new();
    opts.optopt("s", "syntax", "sublime-syntax to use (default: Default)", "NAME");
    opts.optopt(
        "c",
        "color-scheme",
        "sublime-color-scheme to use (default: Default)",
        "NAME",
    );
    opts.optflag("d", "debug", "turn debug tracing on (written to stderr)");
    opts.optflag("S", "show-scopes", "output scope tags around each scope region");
    opts.optflag("", "list-syntaxes", "list available syntaxes");
    opts.optflag("", "list-color-schemes", "list available color schemes");
    opts.optopt("", "syntax-dir", "directory with .sublime-syntax files", "DIR");
    opts.optopt("", "scheme-dir", "directory with .sublime-color-scheme files", "DIR");
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("synterm: {}", f);
            exit(2);
        }
    };
    if matches.opt_present("help") {
        print_usage(&args[0], &opts);
        return;
    }

    let mut logger = env_logger::Builder::from_default_env();
    if matches.opt_present("debug") {
        logger.filter_level(log::LevelFilter::Trace);
    }
    logger.init();

    if let Err(e) = run(&matches) {
        eprintln!("synterm: {}", e);
        exit(1);
    }
}

fn run(matches: &getopts::Matches) -> Result<(), Box<dyn Error>> {
    let base_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    let syntax_dir = matches
        .opt_str("syntax-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| base_dir.join("syntax"));
    let scheme_dir = matches
        .opt_str("scheme-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| base_dir.join("color-scheme"));

    let mut listed = false;
    if matches.opt_present("list-syntaxes") {
        let names = SyntaxSet::new(&syntax_dir).syntax_names()?;
        println!("{}", serde_json::to_string_pretty(&json!({ "syntaxes": names }))?);
        listed = true;
    }
    if matches.opt_present("list-color-schemes") {
        let names = scheme_names(&scheme_dir)?;
        println!("{}", serde_json::to_string_pretty(&json!({ "color-schemes": names }))?);
        listed = true;
    }
    if listed {
        return Ok(());
    }

    let syntax_name = matches.opt_str("syntax").unwrap_or_else(|| "Default".to_owned());
    let scheme_name = matches
        .opt_str("color-scheme")
        .unwrap_or_else(|| "Default".to_owned());

    let mut syntaxes = SyntaxSet::new(&syntax_dir);
    let main_syntax = syntaxes.load(&syntax_name)?;
    let scheme =
        ColorScheme::load_from_file(scheme_dir.join(format!("{}.{}", scheme_name, SCHEME_FILE_EXT)))?;

    let stdout = io::stdout();
    let mut highlighter = SyntaxHighlighter::new(
        syntaxes,
        main_syntax,
        scheme,
        stdout.lock(),
        matches.opt_present("show-scopes"),
    );

    highlighter.begin()?;
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut line = String::new();
    // read_line keeps the trailing newline, which the syntaxes want to see
    while reader.read_line(&mut line)? > 0 {
        highlighter.process(&line)?;
        highlighter.flush()?;
        line.clear();
    }
    highlighter.end()?;

    let mut out = highlighter.finish();
    out.write_all(SGR_RESET.as_bytes())?;
    out.flush()?;
    Ok(())
}
