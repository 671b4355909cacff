//! File-backed keyed store for ADO trajectories.
//!
//! A store is a single binary file holding a header tagged with
//! `{d, N_ado, parity}` followed by records keyed by the decimal rendering
//! of their save times. Creation refuses a pre-existing file and writing
//! refuses a duplicate key; write failures are surfaced immediately.

use std::{
    fs::{ File, OpenOptions },
    io::{ BufReader, BufWriter, ErrorKind, Read, Write },
    path::Path,
};
use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use rustc_hash::FxHashSet as HashSet;
use crate::{
    HeomError, HeomResult,
    ado::AdoVector,
    heom::{ HeomMatrix, Parity },
};

const MAGIC: &[u8; 8] = b"HEOMADO1";

fn parity_code(parity: Parity) -> u8 {
    match parity {
        Parity::Even => 0,
        Parity::Odd => 1,
        Parity::None => 2,
    }
}

fn parity_decode(code: u8) -> HeomResult<Parity> {
    match code {
        0 => Ok(Parity::Even),
        1 => Ok(Parity::Odd),
        2 => Ok(Parity::None),
        c => Err(HeomError::BadCheckpoint(
            format!("unknown parity code {}", c))),
    }
}

/// Streaming writer over a fresh checkpoint file.
#[derive(Debug)]
pub struct CheckpointWriter {
    file: BufWriter<File>,
    keys: HashSet<String>,
    dim: usize,
    n_ado: usize,
    parity: Parity,
}

impl CheckpointWriter {
    /// Create the store for trajectories of the given generator.
    ///
    /// Fails before any work if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P, m: &HeomMatrix)
        -> HeomResult<Self>
    {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    HeomError::CheckpointExists(path.to_path_buf())
                } else {
                    HeomError::Io(e)
                }
            })?;
        let mut file = BufWriter::new(file);
        file.write_all(MAGIC)?;
        file.write_all(&(m.dim() as u64).to_le_bytes())?;
        file.write_all(&(m.n_ado() as u64).to_le_bytes())?;
        file.write_all(&[parity_code(m.parity())])?;
        file.flush()?;
        Ok(Self {
            file,
            keys: HashSet::default(),
            dim: m.dim(),
            n_ado: m.n_ado(),
            parity: m.parity(),
        })
    }

    /// Append one state keyed by the decimal rendering of `t`.
    ///
    /// Fails on a duplicate key or a shape mismatch with the header.
    pub fn write(&mut self, t: f64, ados: &AdoVector) -> HeomResult<()> {
        let expected = self.n_ado * self.dim * self.dim;
        if ados.data().len() != expected {
            return Err(HeomError::AdoLenMismatch {
                expected,
                got: ados.data().len(),
            });
        }
        let key = format!("{}", t);
        if !self.keys.insert(key.clone()) {
            return Err(HeomError::DuplicateKey(key));
        }
        self.file.write_all(&(key.len() as u64).to_le_bytes())?;
        self.file.write_all(key.as_bytes())?;
        for v in ados.data().iter() {
            self.file.write_all(&v.re.to_le_bytes())?;
            self.file.write_all(&v.im.to_le_bytes())?;
        }
        self.file.flush()?;
        Ok(())
    }
}

/// Reader over a finished checkpoint file.
#[derive(Clone, Debug)]
pub struct CheckpointReader {
    dim: usize,
    n_ado: usize,
    parity: Parity,
    records: Vec<(String, nd::Array1<C64>)>,
}

impl CheckpointReader {
    /// Read a whole store back into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> HeomResult<Self> {
        let mut file = BufReader::new(File::open(path.as_ref())?);
        let mut magic = [0_u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HeomError::BadCheckpoint(
                "bad magic bytes".to_string()));
        }
        let dim = read_u64(&mut file)? as usize;
        let n_ado = read_u64(&mut file)? as usize;
        let mut code = [0_u8; 1];
        file.read_exact(&mut code)?;
        let parity = parity_decode(code[0])?;
        let len = n_ado * dim * dim;
        let mut records: Vec<(String, nd::Array1<C64>)> = Vec::new();
        loop {
            let key_len = match read_u64_opt(&mut file)? {
                Some(n) => n as usize,
                None => break,
            };
            let mut key_bytes = vec![0_u8; key_len];
            file.read_exact(&mut key_bytes)?;
            let key = String::from_utf8(key_bytes)
                .map_err(|_| HeomError::BadCheckpoint(
                    "non-utf8 key".to_string()))?;
            let mut data: nd::Array1<C64> = nd::Array1::zeros(len);
            let mut buf = [0_u8; 8];
            for v in data.iter_mut() {
                file.read_exact(&mut buf)?;
                let re = f64::from_le_bytes(buf);
                file.read_exact(&mut buf)?;
                let im = f64::from_le_bytes(buf);
                *v = C64::new(re, im);
            }
            records.push((key, data));
        }
        Ok(Self { dim, n_ado, parity, records })
    }

    /// Return the system dimension tag.
    pub fn dim(&self) -> usize { self.dim }

    /// Return the ADO-count tag.
    pub fn n_ado(&self) -> usize { self.n_ado }

    /// Return the parity tag.
    pub fn parity(&self) -> Parity { self.parity }

    /// Return the stored `(key, data)` records in write order.
    pub fn records(&self) -> &[(String, nd::Array1<C64>)] { &self.records }
}

fn read_u64<R: Read>(r: &mut R) -> HeomResult<u64> {
    let mut buf = [0_u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

// None at a clean end-of-file, an error on a torn record
fn read_u64_opt<R: Read>(r: &mut R) -> HeomResult<Option<u64>> {
    let mut buf = [0_u8; 8];
    let mut filled: usize = 0;
    while filled < 8 {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(HeomError::BadCheckpoint(
                    "torn record header".to_string()))
            };
        }
        filled += n;
    }
    Ok(Some(u64::from_le_bytes(buf)))
}
