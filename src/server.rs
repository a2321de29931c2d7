//! Query server (§6): a blocking TCP accept loop serving the plain-text
//! wire protocol. Each connection is handled sequentially unless
//! `forking` requests a process-per-connection model.
//!
//! The source recovered from a client write failing mid-response (broken
//! pipe/SIGPIPE) via `setjmp`/`longjmp` back to the accept loop. Rust has no
//! equivalent control-transfer primitive and does not need one: every
//! socket write already returns a `Result`, so a write error just aborts
//! the current connection's handler and the loop moves on to `accept`.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

use crate::config::Config;
use crate::errors::Result;
use crate::model::TrainedModel;
use crate::row::{Row, WordEntry};
use crate::vocab::Vocabulary;
use crate::weighting;

/// Tokenizes already-lexed query text into a `Row` by looking each
/// whitespace-separated token up in `vocab`. Tokens the vocabulary doesn't
/// recognize are silently dropped — unknown-token handling for text input
/// is the external lexer's job (§1), not this core's.
pub fn tokenize_query(vocab: &Vocabulary, text: &str) -> Row {
    let mut counts: std::collections::HashMap<_, u32> = std::collections::HashMap::new();
    for token in text.split_whitespace() {
        let lower = token.to_lowercase();
        if let Some(wi) = vocab.lookup_no_add(&lower) {
            *counts.entry(wi).or_insert(0) += 1;
        }
    }
    let entries = counts
        .into_iter()
        .map(|(wi, count)| WordEntry {
            wi,
            count,
            weight: count as f64,
        })
        .collect();
    Row::from_unsorted(entries)
}

/// Writes one query's response: one `<classname> <score>` line per class in
/// descending-score order, then a lone `.` terminator, flushing after.
fn write_response(stream: &mut impl Write, ranked: &[(String, f64)]) -> std::io::Result<()> {
    for (name, score) in ranked {
        writeln!(stream, "{name} {score}")?;
    }
    writeln!(stream, ".")?;
    stream.flush()
}

/// Reads one query: lines up to and including a lone `.` terminator line
/// (the client is expected to send `\n.\r\n`, but a bare `.\n` is accepted
/// too since `BufRead::lines` already strips the line terminator).
fn read_query(reader: &mut impl BufRead) -> std::io::Result<Option<String>> {
    let mut body = String::new();
    let mut saw_any = false;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(if saw_any { Some(body) } else { None });
        }
        saw_any = true;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "." {
            return Ok(Some(body));
        }
        body.push_str(trimmed);
        body.push(' ');
    }
}

fn handle_connection(
    mut stream: TcpStream,
    model: &TrainedModel,
    vocab: &Vocabulary,
    term_scale: &[f64],
    config: &Config,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "failed to clone connection for reading");
            return;
        }
    };
    let mut reader = BufReader::new(reader_stream);

    loop {
        let query = match read_query(&mut reader) {
            Ok(Some(q)) => q,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "query read failed");
                break;
            }
        };
        let mut row = tokenize_query(vocab, &query);
        weighting::weight_row(&mut row, config, |wi| {
            term_scale.get(wi.index()).copied().unwrap_or(0.0)
        });
        let ranked = model.ranked_scores(&row, config);
        if let Err(e) = write_response(&mut stream, &ranked) {
            tracing::warn!(%peer, error = %e, "query write failed, dropping connection");
            break;
        }
    }
}

/// Runs the blocking accept loop on `port`, serving `model`/`vocab` until
/// the process is killed. `term_scale` is the per-term IDF/information-gain
/// scale the training corpus was weighted with (see `weighting::apply_weighting`),
/// so a freshly tokenized query row is weighted identically to the rows the
/// model was trained on. When `forking` is set, each connection is
/// serviced in a freshly spawned OS thread instead of the accept loop
/// itself — the portable stand-in for the source's `fork()` per
/// connection, since the loaded model is read-only and safe to share.
pub fn run(
    port: u16,
    model: TrainedModel,
    vocab: Vocabulary,
    term_scale: Vec<f64>,
    config: Config,
    forking: bool,
) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    tracing::info!(port, forking, "query server listening");
    let model = std::sync::Arc::new(model);
    let vocab = std::sync::Arc::new(vocab);
    let term_scale = std::sync::Arc::new(term_scale);
    let config = std::sync::Arc::new(config);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        if forking {
            let model = std::sync::Arc::clone(&model);
            let vocab = std::sync::Arc::clone(&vocab);
            let term_scale = std::sync::Arc::clone(&term_scale);
            let config = std::sync::Arc::clone(&config);
            std::thread::spawn(move || {
                handle_connection(stream, &model, &vocab, &term_scale, &config)
            });
        } else {
            handle_connection(stream, &model, &vocab, &term_scale, &config);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::VocabMode;

    fn toy_vocab() -> Vocabulary {
        let mut v = Vocabulary::new(VocabMode::Open);
        v.add("cat").unwrap();
        v.add("dog").unwrap();
        v.freeze();
        v
    }

    #[test]
    fn tokenize_query_drops_unknown_tokens_and_counts_known_ones() {
        let vocab = toy_vocab();
        let row = tokenize_query(&vocab, "Cat cat dog bird");
        let total: u32 = row.entries().iter().map(|e| e.count).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn read_query_stops_at_dot_terminator() {
        let input = "hello world\r\n.\r\nignored after terminator";
        let mut reader = BufReader::new(input.as_bytes());
        let query = read_query(&mut reader).unwrap().unwrap();
        assert_eq!(query.trim(), "hello world");
    }

    #[test]
    fn read_query_returns_none_at_clean_eof() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_query(&mut reader).unwrap().is_none());
    }

    #[test]
    fn write_response_emits_lines_then_terminator() {
        let mut buf = Vec::new();
        write_response(&mut buf, &[("pets".into(), 0.9), ("other".into(), 0.1)]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "pets 0.9\nother 0.1\n.\n");
    }
}
