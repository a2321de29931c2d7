//! CLI entry point: wires the §6 flag catalog to indexing, training,
//! querying, testing, and the query server.

use std::collections::HashMap;
use std::fs;
use std::io::Read as _;
use std::path::Path;

use clap::Parser;

use crossbow::archive;
use crossbow::barrel::{Barrel, BarrelKind};
use crossbow::cli::{Cli, MethodArg};
use crossbow::config::Config;
use crossbow::document::{Cdoc, ClassId, Tag};
use crossbow::errors::{CrossbowError, Result};
use crossbow::method::Method;
use crossbow::model::TrainedModel;
use crossbow::row::{Row, WordEntry};
use crossbow::vocab::{VocabMode, Vocabulary};
use crossbow::{active, em, maxent, naive_bayes, server, svm, weighting};

fn tokenize_for_index(vocab: &mut Vocabulary, text: &str) -> Result<Row> {
    let mut counts: HashMap<_, u32> = HashMap::new();
    for token in text.split_whitespace() {
        let wi = vocab.add(&token.to_lowercase())?;
        *counts.entry(wi).or_insert(0) += 1;
    }
    let entries = counts
        .into_iter()
        .map(|(wi, count)| WordEntry { wi, count, weight: count as f64 })
        .collect();
    Ok(Row::from_unsorted(entries))
}

/// Indexes `dir/<classname>/<file>` into `barrel`, tagging every document
/// `tag` and every newly-seen class name with a fresh `ClassId`.
fn index_directory(barrel: &mut Barrel, dir: &Path, tag: Tag) -> Result<()> {
    let mut class_ids: HashMap<String, ClassId> = barrel
        .classnames
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), ClassId(i as u32)))
        .collect();

    let mut class_dirs: Vec<_> = fs::read_dir(dir)
        .map_err(|e| CrossbowError::invalid_argument(format!("reading {}: {e}", dir.display())))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    class_dirs.sort_by_key(|e| e.file_name());

    for class_dir in class_dirs {
        let classname = class_dir.file_name().to_string_lossy().into_owned();
        let class = *class_ids.entry(classname.clone()).or_insert_with(|| {
            let id = ClassId(barrel.classnames.len() as u32);
            barrel.classnames.push(classname.clone());
            id
        });

        let mut files: Vec<_> = fs::read_dir(class_dir.path())
            .map_err(CrossbowError::from)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        files.sort_by_key(|e| e.file_name());

        #[cfg(feature = "parallel")]
        let progress = indexing_progress_bar(files.len() as u64, &classname);

        for file in files {
            let mut text = String::new();
            fs::File::open(file.path())?.read_to_string(&mut text)?;
            let row = tokenize_for_index(&mut barrel.vocab, &text)?;
            let mut cdoc = Cdoc::new(tag, file.path().to_string_lossy().into_owned());
            cdoc.class = Some(class);
            cdoc.word_count = row.word_count();
            let doc_id = barrel.docs.push(cdoc);
            for e in row.entries() {
                barrel.index.add(e.wi, doc_id, e.count, e.weight);
            }
            #[cfg(feature = "parallel")]
            progress.inc(1);
        }
        #[cfg(feature = "parallel")]
        progress.finish_and_clear();
    }
    Ok(())
}

/// A `--index`-progress bar over one class directory's files, matching the
/// source's per-class indexing progress report.
#[cfg(feature = "parallel")]
fn indexing_progress_bar(len: u64, classname: &str) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(len);
    bar.set_style(
        indicatif::ProgressStyle::with_template(
            "{prefix} [{bar:30}] {pos}/{len}",
        )
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
        .progress_chars("=> "),
    );
    bar.set_prefix(format!("indexing {classname}"));
    bar
}

/// Indexes a `classname<TAB>pre-tokenized words` line file.
fn index_lines(barrel: &mut Barrel, path: &Path, tag: Tag) -> Result<()> {
    let text = fs::read_to_string(path)?;
    let mut class_ids: HashMap<String, ClassId> = barrel
        .classnames
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), ClassId(i as u32)))
        .collect();
    #[cfg(feature = "parallel")]
    let progress = indexing_progress_bar(text.lines().count() as u64, &path.display().to_string());

    for (line_no, line) in text.lines().enumerate() {
        #[cfg(feature = "parallel")]
        progress.inc(1);
        if line.trim().is_empty() {
            continue;
        }
        let Some((classname, body)) = line.split_once('\t') else {
            return Err(CrossbowError::invalid_argument(format!(
                "{}:{}: missing tab between class and tokens",
                path.display(),
                line_no + 1
            )));
        };
        let class = *class_ids.entry(classname.to_string()).or_insert_with(|| {
            let id = ClassId(barrel.classnames.len() as u32);
            barrel.classnames.push(classname.to_string());
            id
        });
        let row = tokenize_for_index(&mut barrel.vocab, body)?;
        let mut cdoc = Cdoc::new(tag, format!("{}:{}", path.display(), line_no + 1));
        cdoc.class = Some(class);
        cdoc.word_count = row.word_count();
        let doc_id = barrel.docs.push(cdoc);
        for e in row.entries() {
            barrel.index.add(e.wi, doc_id, e.count, e.weight);
        }
    }
    #[cfg(feature = "parallel")]
    progress.finish_and_clear();
    Ok(())
}

/// Indexes a `classname<TAB>wi:count wi:count ...` sparse-matrix line file,
/// against the barrel's already-frozen vocabulary.
fn index_matrix(barrel: &mut Barrel, spec: &str, tag: Tag) -> Result<()> {
    let (format, path) = spec
        .split_once('=')
        .ok_or_else(|| CrossbowError::invalid_argument("--index-matrix expects FORMAT=FILE"))?;
    if format != "sparse" {
        return Err(CrossbowError::invalid_argument(format!(
            "unsupported index-matrix format {format:?}; only \"sparse\" is implemented"
        )));
    }
    let text = fs::read_to_string(path)?;
    let mut class_ids: HashMap<String, ClassId> = barrel
        .classnames
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), ClassId(i as u32)))
        .collect();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((classname, body)) = line.split_once('\t') else {
            return Err(CrossbowError::invalid_argument(format!(
                "{path}:{}: missing tab between class and term pairs",
                line_no + 1
            )));
        };
        let class = *class_ids.entry(classname.to_string()).or_insert_with(|| {
            let id = ClassId(barrel.classnames.len() as u32);
            barrel.classnames.push(classname.to_string());
            id
        });
        let mut cdoc = Cdoc::new(tag, format!("{path}:{}", line_no + 1));
        cdoc.class = Some(class);
        let doc_id = barrel.docs.push(cdoc);
        let mut word_count = 0u32;
        for pair in body.split_whitespace() {
            let (wi_str, count_str) = pair.split_once(':').ok_or_else(|| {
                CrossbowError::invalid_argument(format!("bad term pair {pair:?} on line {}", line_no + 1))
            })?;
            let wi_idx: u32 = wi_str
                .parse()
                .map_err(|_| CrossbowError::invalid_argument(format!("bad term id {wi_str:?}")))?;
            let count: u32 = count_str
                .parse()
                .map_err(|_| CrossbowError::invalid_argument(format!("bad count {count_str:?}")))?;
            word_count += count;
            barrel
                .index
                .add(crossbow::vocab::WordId(wi_idx), doc_id, count, count as f64);
        }
        if let Some(doc) = barrel.docs.get_mut(doc_id) {
            doc.word_count = word_count;
        }
    }
    Ok(())
}

fn apply_vocab_controls(barrel: &mut Barrel, cli: &Cli) -> Result<()> {
    if let Some(path) = &cli.use_vocab_in_file {
        let keep: std::collections::HashSet<String> = fs::read_to_string(path)?
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        barrel.index.hide_by_predicate(&barrel.vocab.clone(), |t| keep.contains(t));
    }
    if let Some(path) = &cli.hide_vocab_in_file {
        let hide: std::collections::HashSet<String> = fs::read_to_string(path)?
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        barrel.index.hide_by_predicate(&barrel.vocab.clone(), |t| !hide.contains(t));
    }
    if let Some(n) = cli.prune_words_by_doc_count {
        barrel.index.hide_words_by_doc_count(n);
    }
    if let Some(n) = cli.prune_vocab_by_occur_count {
        barrel.index.hide_words_by_occur_count(n);
    }
    if let Some(top_n) = cli.prune_vocab_by_infogain {
        let n_classes = barrel.classnames.len().max(1);
        let class_counts = weighting::class_doc_counts(&barrel.docs, n_classes);
        let n_docs = barrel.docs.len() as u64;
        let n_terms = barrel.vocab.len();
        let gains = weighting::infogain(
            &class_counts,
            |wi| {
                let mut per_class = vec![0u64; n_classes];
                if let Some(col) = barrel.index.column_including_hidden(wi) {
                    for e in col.entries() {
                        if let Some(doc) = barrel.docs.get(e.doc) {
                            if let Some(c) = doc.class {
                                per_class[c.index()] += 1;
                            }
                        }
                    }
                }
                per_class
            },
            n_terms,
            n_docs,
        );
        let mut ranked: Vec<usize> = (0..n_terms).collect();
        ranked.sort_by(|&a, &b| gains[b].partial_cmp(&gains[a]).unwrap());
        let keep: std::collections::HashSet<usize> = ranked.into_iter().take(top_n).collect();
        for i in 0..n_terms {
            if !keep.contains(&i) {
                barrel.index.hide(crossbow::vocab::WordId(i as u32));
            }
        }
    }
    Ok(())
}

fn doc_barrel_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join("doc-barrel.crb")
}
fn class_barrel_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join("class-barrel.crb")
}
fn svm_model_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join("svm-model.json")
}

fn train_and_save(doc_barrel: &mut Barrel, config: &Config, method: MethodArg, data_dir: &Path) -> Result<()> {
    match method {
        MethodArg::Naivebayes => {
            let vpc = naive_bayes::train(doc_barrel, config)?;
            archive::save_to_path(class_barrel_path(data_dir), &vpc)?;
        }
        MethodArg::Em => {
            let result = em::run(doc_barrel, config)?;
            archive::save_to_path(class_barrel_path(data_dir), &result.vpc)?;
        }
        MethodArg::Hem => {
            return Err(CrossbowError::invalid_argument(
                "hierarchical EM is trained and evaluated via its own module; it is not yet wired into archive-based CLI serving",
            ));
        }
        MethodArg::Maxent => {
            let vpc = maxent::train(doc_barrel, config)?;
            archive::save_to_path(class_barrel_path(data_dir), &vpc)?;
        }
        MethodArg::Svm => {
            let model = svm::train(doc_barrel, config)?;
            let json = serde_json::to_string(&model)
                .map_err(|e| CrossbowError::archive(format!("svm model encode: {e}")))?;
            fs::write(svm_model_path(data_dir), json)?;
        }
        MethodArg::Active => {
            let rounds = active::run(doc_barrel, config)?;
            tracing::info!(rounds = rounds.len(), "active learning finished");
            let vpc = naive_bayes::train(doc_barrel, config)?;
            archive::save_to_path(class_barrel_path(data_dir), &vpc)?;
        }
    }
    archive::save_to_path(doc_barrel_path(data_dir), doc_barrel)?;
    Ok(())
}

fn load_model(data_dir: &Path) -> Result<TrainedModel> {
    let svm_path = svm_model_path(data_dir);
    if svm_path.exists() {
        let json = fs::read_to_string(&svm_path)?;
        let model = serde_json::from_str(&json)
            .map_err(|e| CrossbowError::archive_at(svm_path.clone(), format!("svm model decode: {e}")))?;
        return Ok(TrainedModel::Svm(model));
    }
    let barrel = archive::load_from_path(class_barrel_path(data_dir))?;
    Ok(TrainedModel::Vpc(barrel))
}

fn run_query(model: &TrainedModel, doc_barrel: &Barrel, config: &Config, text: &str) {
    let mut row = server::tokenize_query(&doc_barrel.vocab, text);
    if row.is_empty() {
        println!(".");
        return;
    }
    weighting::weight_row(&mut row, config, weighting::term_scale_lookup(&doc_barrel.index));
    for (name, score) in model.ranked_scores(&row, config) {
        println!("{name} {score}");
    }
    println!(".");
}

fn run_test(model: &TrainedModel, doc_barrel: &Barrel, config: &Config) -> Result<()> {
    let rows: HashMap<_, _> =
        crossbow::heap_iter::HeapRowIterator::new(&doc_barrel.index, |_| true).collect();
    let mut correct = 0usize;
    let mut total = 0usize;
    for (doc_id, doc) in doc_barrel.docs.iter() {
        if doc.tag != Tag::Test {
            continue;
        }
        let Some(expected) = doc.class else { continue };
        let Some(row) = rows.get(&doc_id) else { continue };
        let ranked = model.ranked_scores(row, config);
        total += 1;
        if let Some((top_name, _)) = ranked.first() {
            if Some(top_name.as_str()) == model.classnames().get(expected.index()).map(String::as_str) {
                correct += 1;
            }
        }
    }
    if total == 0 {
        println!("no Tag::Test documents to evaluate");
    } else {
        println!("accuracy: {}/{} = {:.4}", correct, total, correct as f64 / total as f64);
    }
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    fs::create_dir_all(&cli.data_dir)?;
    let mut config = Config::default();
    config.random_seed = cli.seed;

    let doc_barrel_exists = doc_barrel_path(&cli.data_dir).exists();
    let mut doc_barrel = if doc_barrel_exists {
        archive::load_from_path(doc_barrel_path(&cli.data_dir))?
    } else {
        Barrel {
            vocab: Vocabulary::new(VocabMode::Open),
            index: Default::default(),
            docs: Default::default(),
            classnames: Vec::new(),
            method: Method::NaiveBayes(config.smoothing.clone()),
            kind: BarrelKind::Document,
        }
    };

    for dir in &cli.index {
        index_directory(&mut doc_barrel, dir, Tag::Train)?;
    }
    if let Some(path) = &cli.index_lines {
        index_lines(&mut doc_barrel, path, Tag::Train)?;
    }
    if let Some(spec) = &cli.index_matrix {
        index_matrix(&mut doc_barrel, spec, Tag::Train)?;
    }
    if let Some(dir) = &cli.test_files {
        index_directory(&mut doc_barrel, dir, Tag::Test)?;
    }
    doc_barrel.vocab.freeze();
    apply_vocab_controls(&mut doc_barrel, &cli)?;
    weighting::apply_weighting(&mut doc_barrel, &config);

    if let Some(method) = cli.method {
        train_and_save(&mut doc_barrel, &config, method, &cli.data_dir)?;
    } else {
        archive::save_to_path(doc_barrel_path(&cli.data_dir), &doc_barrel)?;
    }

    if cli.test {
        let model = load_model(&cli.data_dir)?;
        run_test(&model, &doc_barrel, &config)?;
    }

    if let Some(query_arg) = &cli.query {
        let model = load_model(&cli.data_dir)?;
        let text = match query_arg {
            Some(path) => fs::read_to_string(path)?,
            None => {
                let mut s = String::new();
                std::io::stdin().read_to_string(&mut s)?;
                s
            }
        };
        run_query(&model, &doc_barrel, &config, &text);
    }

    if let Some(port) = cli.query_server {
        let model = load_model(&cli.data_dir)?;
        let term_scale = weighting::term_scale_snapshot(&doc_barrel.index, doc_barrel.vocab.len());
        server::run(port, model, doc_barrel.vocab, term_scale, config, false)?;
    } else if let Some(port) = cli.forking_query_server {
        let model = load_model(&cli.data_dir)?;
        let term_scale = weighting::term_scale_snapshot(&doc_barrel.index, doc_barrel.vocab.len());
        server::run(port, model, doc_barrel.vocab, term_scale, config, true)?;
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
