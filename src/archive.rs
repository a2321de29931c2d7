//! On-disk archive format (§6): a little-endian binary encoding of a
//! `Barrel`, with a fixed header, a per-term column offset table enabling
//! lazy loading, and a CRC32 integrity footer.
//!
//! The original tool wrote host-order floats directly — effectively
//! little-endian only on the machines it ran on. This format fixes the
//! byte order explicitly rather than reproducing that portability gap.

use std::io::{Read, Seek, SeekFrom, Write};

use crc32fast::Hasher;

use crate::barrel::{Barrel, BarrelKind};
use crate::document::{Cdoc, ClassId, ClassProbs, DocumentRegistry, Tag};
use crate::errors::{CrossbowError, Result};
use crate::method::Method;
use crate::sparse::{Entry, SparseIndex};
use crate::vocab::{VocabMode, Vocabulary, WordId};

const MAGIC: [u8; 4] = *b"CRWB";
const VERSION: u32 = 1;

fn w_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}
fn w_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn w_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn w_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn w_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn w_string(out: &mut Vec<u8>, s: &str) {
    w_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(CrossbowError::archive("unexpected end of archive"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CrossbowError::archive(format!("non-utf8 string: {e}")))
    }
}

fn tag_code(tag: Tag) -> u8 {
    match tag {
        Tag::Train => 0,
        Tag::Test => 1,
        Tag::Unlabeled => 2,
        Tag::Untagged => 3,
        Tag::Validation => 4,
        Tag::Ignore => 5,
        Tag::Pool => 6,
        Tag::Waiting => 7,
    }
}

fn tag_of_code(code: u8) -> Result<Tag> {
    Ok(match code {
        0 => Tag::Train,
        1 => Tag::Test,
        2 => Tag::Unlabeled,
        3 => Tag::Untagged,
        4 => Tag::Validation,
        5 => Tag::Ignore,
        6 => Tag::Pool,
        7 => Tag::Waiting,
        other => return Err(CrossbowError::archive(format!("bad tag code {other}"))),
    })
}

fn write_cdoc(out: &mut Vec<u8>, doc: &Cdoc) {
    w_u8(out, tag_code(doc.tag));
    w_i32(out, doc.class.map(|c| c.0 as i32).unwrap_or(-1));
    w_string(out, &doc.filename);
    w_u32(out, doc.word_count);
    w_f64(out, doc.normalizer);
    w_f64(out, doc.prior);
    match &doc.class_probs {
        Some(cp) => {
            w_u8(out, 1);
            w_u32(out, cp.0.len() as u32);
            for &p in &cp.0 {
                w_f64(out, p);
            }
        }
        None => w_u8(out, 0),
    }
}

fn read_cdoc(r: &mut ByteReader) -> Result<Cdoc> {
    let tag = tag_of_code(r.u8()?)?;
    let class_raw = r.i32()?;
    let filename = r.string()?;
    let word_count = r.u32()?;
    let normalizer = r.f64()?;
    let prior = r.f64()?;
    let has_probs = r.u8()?;
    let class_probs = if has_probs == 1 {
        let n = r.u32()? as usize;
        let mut v = Vec::with_capacity(n);
        for _ in 0..n {
            v.push(r.f64()?);
        }
        Some(ClassProbs(v))
    } else {
        None
    };
    Ok(Cdoc {
        tag,
        class: if class_raw < 0 { None } else { Some(ClassId(class_raw as u32)) },
        filename,
        word_count,
        normalizer,
        prior,
        class_probs,
    })
}

fn write_column_body(out: &mut Vec<u8>, entries: &[Entry], idf: f64) {
    w_f64(out, idf);
    w_u32(out, entries.len() as u32);
    for e in entries {
        w_u32(out, e.doc.0);
        w_u32(out, e.count);
        w_f64(out, e.weight);
    }
}

fn read_column_body(r: &mut ByteReader) -> Result<(f64, Vec<Entry>)> {
    let idf = r.f64()?;
    let n = r.u32()? as usize;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let doc = crate::document::DocId(r.u32()?);
        let count = r.u32()?;
        let weight = r.f64()?;
        entries.push(Entry { doc, count, weight });
    }
    Ok((idf, entries))
}

/// Serializes `barrel` to the archive byte format, with a CRC32 trailer
/// covering everything written before it.
pub fn to_bytes(barrel: &Barrel) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    w_u32(&mut out, VERSION);

    w_u8(&mut out, matches!(barrel.vocab.mode(), VocabMode::Open) as u8
        | ((matches!(barrel.vocab.mode(), VocabMode::ClosedWithUnknown) as u8) << 1));
    w_u32(&mut out, barrel.vocab.len() as u32);
    for (_, term) in barrel.vocab.iter() {
        w_string(&mut out, term);
    }

    w_u32(&mut out, barrel.classnames.len() as u32);
    for name in &barrel.classnames {
        w_string(&mut out, name);
    }

    w_u8(&mut out, matches!(barrel.kind, BarrelKind::Vpc) as u8);

    let method_json = serde_json::to_string(&barrel.method)
        .map_err(|e| CrossbowError::archive(format!("method metadata encode: {e}")))?;
    w_string(&mut out, &method_json);

    w_u32(&mut out, barrel.docs.len() as u32);
    for (_, doc) in barrel.docs.iter() {
        write_cdoc(&mut out, doc);
    }

    // Column bodies are written first into scratch buffers so the offset
    // table (needed for lazy per-term loading) can be emitted before them.
    let n_columns = barrel.vocab.len();
    let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(n_columns);
    let mut presence = Vec::with_capacity(n_columns);
    for i in 0..n_columns {
        let wi = WordId(i as u32);
        match barrel.index.column_including_hidden(wi) {
            Some(col) => {
                let mut body = Vec::new();
                write_column_body(&mut body, col.entries(), col.idf);
                presence.push((true, barrel.index.is_hidden(wi)));
                bodies.push(body);
            }
            None => {
                presence.push((false, false));
                bodies.push(Vec::new());
            }
        }
    }

    w_u32(&mut out, n_columns as u32);
    let table_start = out.len();
    // Placeholder offsets, patched below once body positions are known.
    for _ in 0..n_columns {
        w_u8(&mut out, 0);
        w_u8(&mut out, 0);
        w_u64(&mut out, 0);
        w_u64(&mut out, 0);
    }
    let mut offsets = Vec::with_capacity(n_columns);
    for body in &bodies {
        offsets.push((out.len() as u64, body.len() as u64));
        out.extend_from_slice(body);
    }
    {
        let mut cursor = table_start;
        for (i, &(present, hidden)) in presence.iter().enumerate() {
            out[cursor] = present as u8;
            out[cursor + 1] = hidden as u8;
            out[cursor + 2..cursor + 10].copy_from_slice(&offsets[i].0.to_le_bytes());
            out[cursor + 10..cursor + 18].copy_from_slice(&offsets[i].1.to_le_bytes());
            cursor += 18;
        }
    }

    let mut hasher = Hasher::new();
    hasher.update(&out);
    let crc = hasher.finalize();
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Parses an archive's header, document registry, and vocabulary eagerly,
/// but keeps column bodies unparsed until `load_column` is called — the
/// lazy per-term load the format exists to support.
pub struct ArchiveReader<'a> {
    buf: &'a [u8],
    offsets: Vec<(bool, bool, u64, u64)>,
    pub vocab: Vocabulary,
    pub classnames: Vec<String>,
    pub kind: BarrelKind,
    pub method: Method,
    pub docs: DocumentRegistry,
    /// Memoizes `load_column` so a caller re-reading the same few hot terms
    /// (e.g. repeated queries against the same model) doesn't re-parse
    /// their bytes every time.
    #[cfg(feature = "parallel")]
    column_cache: parking_lot::RwLock<std::collections::HashMap<u32, Option<(f64, Vec<Entry>)>>>,
}

impl<'a> ArchiveReader<'a> {
    pub fn open(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(CrossbowError::archive("archive too short for magic"));
        }
        if buf[0..4] != MAGIC {
            return Err(CrossbowError::archive("bad magic"));
        }
        if buf.len() < 8 {
            return Err(CrossbowError::archive("archive too short for footer"));
        }
        let body = &buf[..buf.len() - 4];
        let stored_crc = u32::from_le_bytes(buf[buf.len() - 4..].try_into().unwrap());
        let mut hasher = Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(CrossbowError::archive("CRC32 mismatch"));
        }

        let mut r = ByteReader::new(body);
        r.take(4)?; // magic already checked
        let version = r.u32()?;
        if version != VERSION {
            return Err(CrossbowError::archive(format!("unsupported version {version}")));
        }

        let mode_bits = r.u8()?;
        let mode = if mode_bits & 0b10 != 0 {
            VocabMode::ClosedWithUnknown
        } else if mode_bits & 0b01 != 0 {
            VocabMode::Open
        } else {
            VocabMode::Closed
        };
        let n_terms = r.u32()? as usize;
        let mut terms = Vec::with_capacity(n_terms);
        for _ in 0..n_terms {
            terms.push(r.string()?);
        }
        let vocab = Vocabulary::restore(mode, terms);

        let n_classes = r.u32()? as usize;
        let mut classnames = Vec::with_capacity(n_classes);
        for _ in 0..n_classes {
            classnames.push(r.string()?);
        }

        let kind = if r.u8()? == 1 { BarrelKind::Vpc } else { BarrelKind::Document };

        let method_json = r.string()?;
        let method: Method = serde_json::from_str(&method_json)
            .map_err(|e| CrossbowError::archive(format!("method metadata decode: {e}")))?;

        let n_docs = r.u32()? as usize;
        let mut docs = DocumentRegistry::default();
        for _ in 0..n_docs {
            docs.push(read_cdoc(&mut r)?);
        }

        let n_columns = r.u32()? as usize;
        if n_columns != vocab.len() {
            return Err(CrossbowError::archive(format!(
                "column count {n_columns} does not match vocabulary size {}",
                vocab.len()
            )));
        }
        let mut offsets = Vec::with_capacity(n_columns);
        for _ in 0..n_columns {
            let present = r.u8()? == 1;
            let hidden = r.u8()? == 1;
            let offset = r.u64()?;
            let len = r.u64()?;
            offsets.push((present, hidden, offset, len));
        }

        Ok(ArchiveReader {
            buf: body,
            offsets,
            vocab,
            classnames,
            kind,
            method,
            docs,
            #[cfg(feature = "parallel")]
            column_cache: parking_lot::RwLock::new(std::collections::HashMap::new()),
        })
    }

    /// Loads column `wi` on demand by seeking directly to its recorded byte
    /// range, without touching any other column's bytes.
    #[cfg(not(feature = "parallel"))]
    pub fn load_column(&self, wi: WordId) -> Result<Option<(f64, Vec<Entry>)>> {
        self.read_column(wi)
    }

    /// As above, but memoized in `column_cache` across repeated calls for
    /// the same `wi`.
    #[cfg(feature = "parallel")]
    pub fn load_column(&self, wi: WordId) -> Result<Option<(f64, Vec<Entry>)>> {
        if let Some(cached) = self.column_cache.read().get(&(wi.index() as u32)) {
            return Ok(cached.clone());
        }
        let loaded = self.read_column(wi)?;
        self.column_cache
            .write()
            .insert(wi.index() as u32, loaded.clone());
        Ok(loaded)
    }

    fn read_column(&self, wi: WordId) -> Result<Option<(f64, Vec<Entry>)>> {
        let Some(&(present, _hidden, offset, len)) = self.offsets.get(wi.index()) else {
            return Err(CrossbowError::archive(format!("no such column {}", wi.index())));
        };
        if !present {
            return Ok(None);
        }
        let start = offset as usize;
        let end = start + len as usize;
        if end > self.buf.len() {
            return Err(CrossbowError::archive("column byte range out of bounds"));
        }
        let mut r = ByteReader::new(&self.buf[start..end]);
        let (idf, entries) = read_column_body(&mut r)?;
        Ok(Some((idf, entries)))
    }

    pub fn is_hidden(&self, wi: WordId) -> bool {
        self.offsets.get(wi.index()).map(|&(_, h, _, _)| h).unwrap_or(false)
    }

    /// Materializes the full `Barrel`, eagerly loading every present
    /// column. Most callers that only need a handful of terms should
    /// prefer `load_column` directly.
    pub fn into_barrel(self) -> Result<Barrel> {
        let mut index = SparseIndex::with_capacity(self.vocab.len());
        for i in 0..self.vocab.len() {
            let wi = WordId(i as u32);
            if let Some((idf, entries)) = self.load_column(wi)? {
                for e in &entries {
                    index.set(wi, e.doc, e.count, e.weight);
                }
                if let Some(col) = index.column_mut(wi) {
                    col.idf = idf;
                }
                if self.is_hidden(wi) {
                    index.hide(wi);
                }
            }
        }
        Ok(Barrel {
            vocab: self.vocab,
            index,
            docs: self.docs,
            classnames: self.classnames,
            method: self.method,
            kind: self.kind,
        })
    }
}

pub fn save<W: Write>(mut writer: W, barrel: &Barrel) -> Result<()> {
    let bytes = to_bytes(barrel)?;
    writer.write_all(&bytes)?;
    Ok(())
}

pub fn save_to_path(path: impl AsRef<std::path::Path>, barrel: &Barrel) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .map_err(|e| CrossbowError::archive_at(path, e.to_string()))?;
    save(std::io::BufWriter::new(file), barrel)
}

pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Barrel> {
    let path = path.as_ref();
    let mut file =
        std::fs::File::open(path).map_err(|e| CrossbowError::archive_at(path, e.to_string()))?;
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    ArchiveReader::open(&buf)?.into_barrel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Smoothing;
    use crate::document::Tag;
    use crate::method::Method;
    use crate::vocab::VocabMode;

    fn toy_barrel() -> Barrel {
        let mut vocab = Vocabulary::new(VocabMode::Open);
        let w0 = vocab.add("cat").unwrap();
        let w1 = vocab.add("dog").unwrap();
        vocab.freeze();
        let mut barrel = Barrel::new_document_barrel(vocab, Method::NaiveBayes(Smoothing::Laplace));
        barrel.classnames = vec!["pets".into(), "other".into()];
        let mut d0 = Cdoc::new(Tag::Train, "d0");
        d0.class = Some(ClassId(0));
        let id0 = barrel.docs.push(d0);
        barrel.index.add(w0, id0, 3, 3.0);
        barrel.index.add(w1, id0, 1, 1.0);
        barrel
    }

    #[test]
    fn round_trip_preserves_entries_and_metadata() {
        let barrel = toy_barrel();
        let bytes = to_bytes(&barrel).unwrap();
        let restored = ArchiveReader::open(&bytes).unwrap().into_barrel().unwrap();
        assert_eq!(restored.classnames, barrel.classnames);
        assert_eq!(restored.vocab.len(), barrel.vocab.len());
        let e = restored.index.entry(WordId(0), crate::document::DocId(0)).unwrap();
        assert_eq!(e.count, 3);
        assert_eq!(e.weight, 3.0);
    }

    #[test]
    fn corrupted_byte_fails_crc_check() {
        let barrel = toy_barrel();
        let mut bytes = to_bytes(&barrel).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(ArchiveReader::open(&bytes).is_err());
    }

    #[test]
    fn save_and_load_from_path_round_trips() {
        let barrel = toy_barrel();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.crb");
        save_to_path(&path, &barrel).unwrap();
        let restored = load_from_path(&path).unwrap();
        assert_eq!(restored.classnames, barrel.classnames);
        let e = restored.index.entry(WordId(1), crate::document::DocId(0)).unwrap();
        assert_eq!(e.count, 1);
    }

    #[test]
    fn lazy_column_load_reads_only_the_requested_term() {
        let barrel = toy_barrel();
        let bytes = to_bytes(&barrel).unwrap();
        let reader = ArchiveReader::open(&bytes).unwrap();
        let (_, entries) = reader.load_column(WordId(1)).unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 1);
    }
}
