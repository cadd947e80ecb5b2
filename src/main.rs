use rayon::prelude::*;
use std::fmt::Display;
use std::fs;
use std::io::{self, Read};
use std::str::FromStr;
use tracing::{debug, Level};

use spmtok::{RemappedTokenizer, SentencePieceTokenizer, Tokenizer};

const OUTPUT_MODES: &[&str] = &["ids", "pieces", "spans", "count"];

const MODEL_ENV: &str = "SPMTOK_MODEL";
const VOCAB_ENV: &str = "SPMTOK_VOCAB";

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-input failures travel back from rayon workers to `main`.
type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

enum Loaded {
    Base(SentencePieceTokenizer),
    Remapped(RemappedTokenizer),
}

impl Loaded {
    fn render(&self, text: &str, args: &Args) -> CliResult<Output> {
        match self {
            Loaded::Base(t) => render(t, text, args),
            Loaded::Remapped(t) => render(t, text, args),
        }
    }
}

struct Args {
    model: Option<String>,
    vocab: Option<String>,
    output: String,
    bos: bool,
    eos: bool,
    decode: bool,
    verbose: bool,
    help: bool,
    version: bool,
    paths: Vec<String>,
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args {
        model: std::env::var(MODEL_ENV).ok(),
        vocab: std::env::var(VOCAB_ENV).ok(),
        output: "ids".to_string(),
        bos: false,
        eos: false,
        decode: false,
        verbose: false,
        help: false,
        version: false,
        paths: Vec::new(),
    };

    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "-V" | "--version" => args.version = true,
            "-h" | "--help" => args.help = true,
            "-d" | "--decode" => args.decode = true,
            "--bos" => args.bos = true,
            "--eos" => args.eos = true,
            "--verbose" => args.verbose = true,
            "-m" | "--model" => args.model = Some(take_value(&argv, &mut i, "--model")),
            "--vocab" => args.vocab = Some(take_value(&argv, &mut i, "--vocab")),
            "-o" | "--output" => args.output = take_value(&argv, &mut i, "--output"),
            s if s.starts_with('-') => {
                eprintln!("Error: unknown option: {}", s);
                std::process::exit(1);
            }
            _ => args.paths.push(argv[i].clone()),
        }
        i += 1;
    }
    args
}

fn take_value(argv: &[String], i: &mut usize, flag: &str) -> String {
    *i += 1;
    if *i >= argv.len() {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    }
    argv[*i].clone()
}

fn print_help() {
    println!(
        "Usage: spmtok [options] [path...]\n\
         \n\
         Tokenize files or stdin with a SentencePiece model.\n\
         \n\
         Options:\n\
         \x20 -m, --model <file>   SentencePiece model (default: ${})\n\
         \x20 --vocab <file>       External vocabulary JSON; ids are remapped (default: ${})\n\
         \x20 -o, --output <mode>  Output mode (default: ids)\n\
         \x20 --bos, --eos         Surround ids with the begin/end of sentence token\n\
         \x20 -d, --decode         Input holds whitespace-separated ids to decode\n\
         \x20 --verbose            Log debug output to stderr\n\
         \x20 -V, --version        Show version\n\
         \x20 -h, --help           Show this help\n\
         \n\
         Output modes: {}\n\
         \n\
         When no paths are given, reads from stdin.",
        MODEL_ENV,
        VOCAB_ENV,
        OUTPUT_MODES.join(", ")
    );
}

enum Output {
    Text(String),
    Count(usize),
}

fn parse_ids<Id: FromStr>(text: &str) -> Result<Vec<Id>, String> {
    text.split_whitespace()
        .map(|word| {
            word.parse::<Id>()
                .map_err(|_| format!("not a token id: {}", word))
        })
        .collect()
}

fn render<T>(tok: &T, text: &str, args: &Args) -> CliResult<Output>
where
    T: Tokenizer,
    T::Id: Display + FromStr,
{
    if args.decode {
        let ids = parse_ids::<T::Id>(text)?;
        return Ok(Output::Text(tok.decode_ids(&ids)?));
    }

    let special = tok.special_tokens();
    let prefix: Vec<T::Id> = special.begin_of_sentence.filter(|_| args.bos).into_iter().collect();
    let suffix: Vec<T::Id> = special.end_of_sentence.filter(|_| args.eos).into_iter().collect();

    Ok(match args.output.as_str() {
        "pieces" => Output::Text(tok.encode_to_strings(text)?.join(" ")),
        "count" => Output::Count(tok.encode_to_ids(text, &prefix, &suffix)?.len()),
        "spans" => {
            let bytes = text.as_bytes();
            let encoding = tok.encode_to_spans(bytes)?;
            let mut out = String::new();
            for (id, span) in encoding.ids.iter().zip(&encoding.spans) {
                let surface = span.to_str(bytes).unwrap_or_default();
                out.push_str(&format!(
                    "{:>8} {:>6}-{:<6} {:?}\n",
                    id, span.begin, span.end, surface
                ));
            }
            Output::Text(out.trim_end().to_string())
        }
        _ => {
            let ids = tok.encode_to_ids(text, &prefix, &suffix)?;
            Output::Text(
                ids.iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
    })
}

fn load(args: &Args) -> Loaded {
    let Some(model) = args.model.as_deref() else {
        eprintln!("Error: no model given (use --model or set {})", MODEL_ENV);
        std::process::exit(1);
    };
    let loaded = match args.vocab.as_deref() {
        Some(vocab) => RemappedTokenizer::new(model, vocab).map(Loaded::Remapped),
        None => SentencePieceTokenizer::new(model).map(Loaded::Base),
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("Error loading {}: {}", model, e);
        std::process::exit(1);
    })
}

fn format_line(count: &str, label: &str) -> String {
    format!("{:>8} {}\n", count, label)
}

fn main() {
    let args = parse_args();

    if args.version {
        println!("spmtok {}", VERSION);
        return;
    }
    if args.help {
        print_help();
        return;
    }
    if !OUTPUT_MODES.contains(&args.output.as_str()) {
        eprintln!(
            "Error: unknown output mode '{}'\nAvailable: {}",
            args.output,
            OUTPUT_MODES.join(", ")
        );
        std::process::exit(1);
    }

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    struct Input {
        name: Option<String>,
        text: String,
    }

    let inputs: Vec<Input> = if args.paths.is_empty() {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).unwrap_or_else(|e| {
            eprintln!("Error reading stdin: {}", e);
            std::process::exit(1);
        });
        vec![Input {
            name: None,
            text: buf,
        }]
    } else {
        args.paths
            .iter()
            .map(|p| {
                let text = fs::read_to_string(p).unwrap_or_else(|e| {
                    eprintln!("Error reading {}: {}", p, e);
                    std::process::exit(1);
                });
                Input {
                    name: Some(p.clone()),
                    text,
                }
            })
            .collect()
    };

    let tokenizer = load(&args);
    debug!(inputs = inputs.len(), output = %args.output, "tokenizer ready");

    let render_one = |input: &Input| tokenizer.render(&input.text, &args);
    let results: Vec<CliResult<Output>> = if inputs.len() > 1 {
        inputs.par_iter().map(render_one).collect()
    } else {
        inputs.iter().map(render_one).collect()
    };

    let mut total = 0;
    for (input, result) in inputs.iter().zip(results) {
        let label = input.name.as_deref().unwrap_or("stdin");
        match result {
            Ok(Output::Count(n)) => {
                total += n;
                print!("{}", format_line(&n.to_string(), label));
            }
            Ok(Output::Text(text)) => {
                if inputs.len() > 1 {
                    println!("==> {} <==", label);
                }
                println!("{}", text);
            }
            Err(e) => {
                eprintln!("Error: {}: {}", label, e);
                std::process::exit(1);
            }
        }
    }
    if args.output == "count" && !args.decode && inputs.len() > 1 {
        print!("{}", format_line(&total.to_string(), "total"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whitespace_separated_ids() {
        assert_eq!(parse_ids::<i32>(" 4 17\n\t250000 "), Ok(vec![4, 17, 250_000]));
        assert_eq!(parse_ids::<i64>(""), Ok(vec![]));
    }

    #[test]
    fn malformed_ids_are_reported_not_fatal() {
        assert_eq!(
            parse_ids::<i32>("4 five 6"),
            Err("not a token id: five".to_string())
        );
        assert!(parse_ids::<i32>("99999999999").is_err());
    }

    fn args(decode: bool) -> Args {
        Args {
            model: None,
            vocab: None,
            output: "ids".to_string(),
            bos: false,
            eos: false,
            decode,
            verbose: false,
            help: false,
            version: false,
            paths: Vec::new(),
        }
    }

    fn small_tokenizer(dir: &std::path::Path) -> SentencePieceTokenizer {
        use spmtok::model_proto::{ModelPieces, Piece, PieceType};
        let path = dir.join("cli.model");
        let pieces = ModelPieces::new(vec![
            Piece::new("<unk>", PieceType::Unknown),
            Piece::new("<s>", PieceType::Control),
            Piece::new("</s>", PieceType::Control),
            Piece::normal("\u{2581}hi"),
        ]);
        fs::write(&path, pieces.to_bytes()).unwrap();
        SentencePieceTokenizer::new(&path).unwrap()
    }

    #[test]
    fn bad_ids_come_back_as_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tok = small_tokenizer(dir.path());

        let err = render(&tok, "3 x", &args(true)).err().unwrap();
        assert_eq!(err.to_string(), "not a token id: x");
        let err = render(&tok, "3 9", &args(true)).err().unwrap();
        assert!(err.to_string().contains("out of range"));
        match render(&tok, "3 3", &args(true)) {
            Ok(Output::Text(text)) => assert_eq!(text, "hi hi"),
            _ => panic!("expected decoded text"),
        }
        match render(&tok, "hi", &args(false)) {
            Ok(Output::Text(text)) => assert_eq!(text, "3"),
            _ => panic!("expected ids"),
        }
    }

    #[test]
    fn count_lines_are_right_aligned() {
        assert_eq!(format_line("12", "total"), "      12 total\n");
    }
}
