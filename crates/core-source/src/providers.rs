//! The four provider flavors.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::Distribution;

use crate::{CHUNK_SIZE, DEFAULT_MAX_CLIENTS, Source, SourceError, SourceOp};

const STREAM_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// A shared vector of doubles; refills wrap to the start.
#[derive(Debug, Clone, Default)]
pub struct ConstantSource {
    pub name: String,
    pub data: Vec<f64>,
}

impl ConstantSource {
    pub fn new(name: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub(crate) fn run(&mut self, src: &mut Source, op: SourceOp) -> Result<(), SourceError> {
        match op {
            SourceOp::Initialize => {
                if self.data.is_empty() {
                    return Err(SourceError::EmptyFile);
                }
                src.buffer.clear();
                src.buffer.extend_from_slice(&self.data);
                src.next_index = 0;
                Ok(())
            }
            SourceOp::Update | SourceOp::Restore => {
                // The buffer is the data; wrapping the cursor is the refill.
                src.next_index = 0;
                Ok(())
            }
            SourceOp::Finalize => {
                src.buffer.clear();
                src.next_index = 0;
                Ok(())
            }
        }
    }
}

/// Little-endian doubles in a file, shared between up to `max_clients`
/// handles. Client `i` starts at chunk `i` and strides `max_clients` chunks
/// per refill, so every client reads a disjoint, reproducible substream.
#[derive(Debug)]
pub struct BinaryFileSource {
    pub name: String,
    pub path: PathBuf,
    pub max_clients: u32,

    file: Option<File>,
    next_client: u32,
    max_reals: u64,
}

impl BinaryFileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            max_clients: DEFAULT_MAX_CLIENTS,
            file: None,
            next_client: 0,
            max_reals: 0,
        }
    }

    pub fn with_max_clients(mut self, max_clients: u32) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    /// Number of doubles in the file, known after [`Self::open`].
    pub fn len_reals(&self) -> u64 {
        self.max_reals
    }

    pub(crate) fn open(&mut self) -> Result<(), SourceError> {
        let file = File::open(&self.path)?;
        self.max_reals = file.metadata()?.len() / 8;
        if self.max_reals == 0 {
            return Err(SourceError::EmptyFile);
        }

        tracing::debug!(
            target: "source.file",
            path = %self.path.display(),
            reals = self.max_reals,
            "binary source opened"
        );
        self.file = Some(file);
        self.next_client = 0;
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!(
                target: "source.file",
                path = %self.path.display(),
                "binary source closed"
            );
        }
        self.next_client = 0;
    }

    fn client_origin(&self, client: u64) -> u64 {
        let origin = client * CHUNK_SIZE as u64;
        if origin >= self.max_reals { 0 } else { origin }
    }

    fn fill(&mut self, src: &mut Source, offset: u64) -> Result<(), SourceError> {
        let client = src.chunk_id[0];
        let offset = if offset >= self.max_reals {
            self.client_origin(client)
        } else {
            offset
        };

        let file = self.file.as_mut().ok_or(SourceError::EmptyFile)?;
        let count = CHUNK_SIZE.min((self.max_reals - offset) as usize);

        let mut bytes = vec![0u8; count * 8];
        file.seek(SeekFrom::Start(offset * 8))?;
        file.read_exact(&mut bytes)?;

        src.buffer.clear();
        src.buffer.extend(
            bytes
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes(b.try_into().expect("8-byte chunk"))),
        );
        src.next_index = 0;

        src.chunk_id[2] = offset;
        src.chunk_id[1] = offset + (self.max_clients as u64) * CHUNK_SIZE as u64;
        Ok(())
    }

    pub(crate) fn run(&mut self, src: &mut Source, op: SourceOp) -> Result<(), SourceError> {
        match op {
            SourceOp::Initialize => {
                if self.file.is_none() {
                    self.open()?;
                }
                if self.next_client >= self.max_clients {
                    return Err(SourceError::TooManyClients);
                }

                let client = self.next_client as u64;
                self.next_client += 1;

                src.chunk_id[0] = client;
                let origin = self.client_origin(client);
                self.fill(src, origin)
            }
            SourceOp::Update => {
                let next = src.chunk_id[1];
                self.fill(src, next)
            }
            SourceOp::Restore => {
                let current = src.chunk_id[2];
                self.fill(src, current)
            }
            SourceOp::Finalize => {
                src.buffer.clear();
                src.next_index = 0;
                Ok(())
            }
        }
    }
}

/// Whitespace-separated ASCII doubles; a single client; rewinds at EOF.
#[derive(Debug)]
pub struct TextFileSource {
    pub name: String,
    pub path: PathBuf,

    reader: Option<BufReader<File>>,
    consumed: u64,
}

impl TextFileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            reader: None,
            consumed: 0,
        }
    }

    pub(crate) fn open(&mut self) -> Result<(), SourceError> {
        let file = File::open(&self.path)?;
        tracing::debug!(
            target: "source.file",
            path = %self.path.display(),
            "text source opened"
        );
        self.reader = Some(BufReader::new(file));
        self.consumed = 0;
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!(
                target: "source.file",
                path = %self.path.display(),
                "text source closed"
            );
        }
        self.consumed = 0;
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::EmptyFile)?;
        reader.seek(SeekFrom::Start(0))?;
        self.consumed = 0;
        Ok(())
    }

    /// Scan the next whitespace-separated token, `None` at end of file.
    fn read_value(&mut self) -> Result<Option<f64>, SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::EmptyFile)?;
        let mut token = String::new();

        loop {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                break;
            }

            let mut used = 0;
            let mut complete = false;
            for &byte in buf {
                used += 1;
                if byte.is_ascii_whitespace() {
                    if !token.is_empty() {
                        complete = true;
                        break;
                    }
                } else {
                    token.push(byte as char);
                }
            }
            reader.consume(used);

            if complete {
                break;
            }
        }

        if token.is_empty() {
            return Ok(None);
        }

        token
            .parse::<f64>()
            .map(Some)
            .map_err(|_| SourceError::Parse(token))
    }

    fn fill(&mut self, src: &mut Source) -> Result<(), SourceError> {
        src.chunk_id[0] = self.consumed;
        src.buffer.clear();
        src.next_index = 0;

        while src.buffer.len() < CHUNK_SIZE {
            match self.read_value()? {
                Some(value) => {
                    src.buffer.push(value);
                    self.consumed += 1;
                }
                None => {
                    if src.buffer.is_empty() && self.consumed == 0 {
                        return Err(SourceError::EmptyFile);
                    }
                    if src.buffer.is_empty() {
                        // End of file with nothing gathered: wrap and retry.
                        self.rewind()?;
                        src.chunk_id[0] = 0;
                        continue;
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    pub(crate) fn run(&mut self, src: &mut Source, op: SourceOp) -> Result<(), SourceError> {
        match op {
            SourceOp::Initialize => {
                if self.reader.is_none() {
                    self.open()?;
                }
                self.rewind()?;
                self.fill(src)
            }
            SourceOp::Update => self.fill(src),
            SourceOp::Restore => {
                // Rewind and skip up to the recorded position, then refill.
                let skip = src.chunk_id[0];
                self.rewind()?;
                for _ in 0..skip {
                    if self.read_value()?.is_none() {
                        break;
                    }
                    self.consumed += 1;
                }
                self.fill(src)
            }
            SourceOp::Finalize => {
                src.buffer.clear();
                src.next_index = 0;
                Ok(())
            }
        }
    }
}

/// Distribution selector for [`RandomSource`]. Parameter slots follow the
/// classical parameterizations; see [`RandomSource::sample_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DistributionKind {
    Bernoulli = 0,
    Binomial = 1,
    Cauchy = 2,
    ChiSquared = 3,
    Exponential = 4,
    ExtremeValue = 5,
    FisherF = 6,
    Gamma = 7,
    Geometric = 8,
    LogNormal = 9,
    NegativeBinomial = 10,
    Normal = 11,
    Poisson = 12,
    StudentT = 13,
    UniformInt = 14,
    UniformReal = 15,
    Weibull = 16,
}

impl DistributionKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        use DistributionKind::*;
        Some(match value {
            0 => Bernoulli,
            1 => Binomial,
            2 => Cauchy,
            3 => ChiSquared,
            4 => Exponential,
            5 => ExtremeValue,
            6 => FisherF,
            7 => Gamma,
            8 => Geometric,
            9 => LogNormal,
            10 => NegativeBinomial,
            11 => Normal,
            12 => Poisson,
            13 => StudentT,
            14 => UniformInt,
            15 => UniformReal,
            16 => Weibull,
            _ => return None,
        })
    }
}

/// PRNG-backed provider. Every client handle owns an independent stream:
/// the stream seed lives in `chunk_id[0]`, the next chunk counter in
/// `chunk_id[1]`, so restoring a chunk is reseed-and-resample rather than
/// replaying the whole history.
#[derive(Debug, Clone)]
pub struct RandomSource {
    pub name: String,
    pub distribution: DistributionKind,
    /// Real parameters (mean/stddev, bounds, scale ... by distribution).
    pub reals: [f64; 2],
    /// Integer parameters (trial counts, bounds).
    pub ints: [i32; 2],

    next_client: u64,
}

impl RandomSource {
    pub fn new(
        name: impl Into<String>,
        distribution: DistributionKind,
        reals: [f64; 2],
        ints: [i32; 2],
    ) -> Self {
        Self {
            name: name.into(),
            distribution,
            reals,
            ints,
            next_client: 0,
        }
    }

    pub(crate) fn reset_clients(&mut self) {
        self.next_client = 0;
    }

    /// Check the parameter set without touching any handle.
    pub(crate) fn validate(&self) -> Result<(), SourceError> {
        let mut probe = StdRng::seed_from_u64(0);
        let mut scratch = Vec::with_capacity(1);
        self.sample_chunk(&mut probe, 1, &mut scratch)
    }

    fn sample_chunk(
        &self,
        rng: &mut StdRng,
        count: usize,
        out: &mut Vec<f64>,
    ) -> Result<(), SourceError> {
        use DistributionKind::*;

        out.clear();
        let [r0, r1] = self.reals;
        let [i0, i1] = self.ints;

        match self.distribution {
            Bernoulli => {
                let d = rand::distributions::Bernoulli::new(r0)
                    .map_err(|_| SourceError::BadDistribution("bernoulli p"))?;
                out.extend((0..count).map(|_| if d.sample(rng) { 1.0 } else { 0.0 }));
            }
            Binomial => {
                let t = u64::try_from(i0)
                    .map_err(|_| SourceError::BadDistribution("binomial trials"))?;
                let d = rand_distr::Binomial::new(t, r0)
                    .map_err(|_| SourceError::BadDistribution("binomial p"))?;
                out.extend((0..count).map(|_| d.sample(rng) as f64));
            }
            Cauchy => {
                let d = rand_distr::Cauchy::new(r0, r1)
                    .map_err(|_| SourceError::BadDistribution("cauchy scale"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            ChiSquared => {
                let d = rand_distr::ChiSquared::new(r0)
                    .map_err(|_| SourceError::BadDistribution("chi-squared k"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            Exponential => {
                let d = rand_distr::Exp::new(r0)
                    .map_err(|_| SourceError::BadDistribution("exponential lambda"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            ExtremeValue => {
                let d = rand_distr::Gumbel::new(r0, r1)
                    .map_err(|_| SourceError::BadDistribution("extreme-value scale"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            FisherF => {
                let d = rand_distr::FisherF::new(r0, r1)
                    .map_err(|_| SourceError::BadDistribution("fisher-f dof"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            Gamma => {
                let d = rand_distr::Gamma::new(r0, r1)
                    .map_err(|_| SourceError::BadDistribution("gamma shape/scale"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            Geometric => {
                let d = rand_distr::Geometric::new(r0)
                    .map_err(|_| SourceError::BadDistribution("geometric p"))?;
                out.extend((0..count).map(|_| d.sample(rng) as f64));
            }
            LogNormal => {
                let d = rand_distr::LogNormal::new(r0, r1)
                    .map_err(|_| SourceError::BadDistribution("log-normal sigma"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            NegativeBinomial => {
                // Gamma–Poisson mixture; `rand_distr` has no direct sampler.
                if !(r0 > 0.0 && r0 < 1.0) || i0 <= 0 {
                    return Err(SourceError::BadDistribution("negative-binomial k/p"));
                }
                let shape = i0 as f64;
                let scale = (1.0 - r0) / r0;
                let gamma = rand_distr::Gamma::new(shape, scale)
                    .map_err(|_| SourceError::BadDistribution("negative-binomial k"))?;
                for _ in 0..count {
                    let mean = gamma.sample(rng).max(f64::MIN_POSITIVE);
                    let poisson = rand_distr::Poisson::new(mean)
                        .map_err(|_| SourceError::BadDistribution("negative-binomial p"))?;
                    out.push(poisson.sample(rng));
                }
            }
            Normal => {
                let d = rand_distr::Normal::new(r0, r1)
                    .map_err(|_| SourceError::BadDistribution("normal stddev"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            Poisson => {
                let d = rand_distr::Poisson::new(r0)
                    .map_err(|_| SourceError::BadDistribution("poisson mean"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            StudentT => {
                let d = rand_distr::StudentT::new(r0)
                    .map_err(|_| SourceError::BadDistribution("student-t dof"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            UniformInt => {
                if i0 >= i1 {
                    return Err(SourceError::BadDistribution("uniform-int bounds"));
                }
                let d = rand::distributions::Uniform::new_inclusive(i0, i1);
                out.extend((0..count).map(|_| d.sample(rng) as f64));
            }
            UniformReal => {
                if !(r0 < r1) {
                    return Err(SourceError::BadDistribution("uniform-real bounds"));
                }
                let d = rand::distributions::Uniform::new(r0, r1);
                out.extend((0..count).map(|_| d.sample(rng)));
            }
            Weibull => {
                let d = rand_distr::Weibull::new(r1, r0)
                    .map_err(|_| SourceError::BadDistribution("weibull shape/scale"))?;
                out.extend((0..count).map(|_| d.sample(rng)));
            }
        }

        Ok(())
    }

    fn fill(&self, src: &mut Source, chunk_index: u64) -> Result<(), SourceError> {
        let stream_seed = src.chunk_id[0];
        let mut rng =
            StdRng::seed_from_u64(stream_seed.wrapping_add(chunk_index.wrapping_mul(STREAM_MIX)));

        self.sample_chunk(&mut rng, CHUNK_SIZE, &mut src.buffer)?;
        src.next_index = 0;
        src.chunk_id[1] = chunk_index + 1;
        Ok(())
    }

    pub(crate) fn run(
        &mut self,
        src: &mut Source,
        op: SourceOp,
        base_seed: [u64; 2],
    ) -> Result<(), SourceError> {
        match op {
            SourceOp::Initialize => {
                let client = self.next_client;
                self.next_client += 1;

                src.chunk_id[0] = base_seed[0]
                    ^ base_seed[1].rotate_left(17)
                    ^ client.wrapping_mul(STREAM_MIX);
                src.chunk_real = self.reals;
                self.fill(src, 0)
            }
            SourceOp::Update => {
                let next = src.chunk_id[1];
                self.fill(src, next)
            }
            SourceOp::Restore => {
                let current = src.chunk_id[1].saturating_sub(1);
                self.fill(src, current)
            }
            SourceOp::Finalize => {
                src.buffer.clear();
                src.next_index = 0;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExternalSource, SourceSpec};
    use std::io::Write;

    #[test]
    fn binary_file_clients_read_disjoint_substreams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");

        // Three chunks of data: chunk k filled with the value k.
        let mut file = std::fs::File::create(&path).unwrap();
        for chunk in 0..3u32 {
            for _ in 0..CHUNK_SIZE {
                file.write_all(&(chunk as f64).to_le_bytes()).unwrap();
            }
        }
        drop(file);

        let mut srcs = ExternalSource::new();
        let id = srcs
            .binary_files
            .alloc(BinaryFileSource::new("bin", &path).with_max_clients(2))
            .unwrap();
        srcs.prepare().unwrap();

        let mut a = Source::new(SourceSpec::binary_file(id));
        let mut b = Source::new(SourceSpec::binary_file(id));
        srcs.initialize(&mut a).unwrap();
        srcs.initialize(&mut b).unwrap();

        assert_eq!(srcs.update(&mut a).unwrap(), 0.0, "client 0 reads chunk 0");
        assert_eq!(srcs.update(&mut b).unwrap(), 1.0, "client 1 reads chunk 1");

        // Drain client 0's first chunk; the next refill strides to chunk 2.
        for _ in 0..CHUNK_SIZE - 1 {
            let _ = srcs.update(&mut a).unwrap();
        }
        assert_eq!(srcs.update(&mut a).unwrap(), 2.0);
    }

    #[test]
    fn binary_file_third_client_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.bin");
        std::fs::write(&path, 1.0f64.to_le_bytes()).unwrap();

        let mut srcs = ExternalSource::new();
        let id = srcs
            .binary_files
            .alloc(BinaryFileSource::new("bin", &path).with_max_clients(2))
            .unwrap();
        srcs.prepare().unwrap();

        let mut a = Source::new(SourceSpec::binary_file(id));
        let mut b = Source::new(SourceSpec::binary_file(id));
        let mut c = Source::new(SourceSpec::binary_file(id));
        srcs.initialize(&mut a).unwrap();
        srcs.initialize(&mut b).unwrap();
        assert!(matches!(
            srcs.initialize(&mut c),
            Err(SourceError::TooManyClients)
        ));
    }

    #[test]
    fn text_file_parses_and_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.txt");
        std::fs::write(&path, "1.5  2.5\n3.5\t-4.0\n").unwrap();

        let mut srcs = ExternalSource::new();
        let id = srcs
            .text_files
            .alloc(TextFileSource::new("txt", &path))
            .unwrap();
        srcs.prepare().unwrap();

        let mut handle = Source::new(SourceSpec::text_file(id));
        srcs.initialize(&mut handle).unwrap();

        let pulled: Vec<f64> = (0..6).map(|_| srcs.update(&mut handle).unwrap()).collect();
        assert_eq!(pulled, vec![1.5, 2.5, 3.5, -4.0, 1.5, 2.5]);
    }

    #[test]
    fn text_file_bad_token_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "1.0 pelican 3.0").unwrap();

        let mut srcs = ExternalSource::new();
        let id = srcs
            .text_files
            .alloc(TextFileSource::new("txt", &path))
            .unwrap();
        srcs.prepare().unwrap();

        let mut handle = Source::new(SourceSpec::text_file(id));
        assert!(matches!(
            srcs.initialize(&mut handle),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn distribution_validation_catches_bad_parameters() {
        let bad = RandomSource::new("u", DistributionKind::UniformReal, [2.0, 1.0], [0, 0]);
        assert!(bad.validate().is_err());

        let good = RandomSource::new("u", DistributionKind::UniformReal, [1.0, 2.0], [0, 0]);
        assert!(good.validate().is_ok());
    }

    #[test]
    fn random_clients_get_distinct_streams() {
        let mut srcs = ExternalSource::new();
        let id = srcs
            .randoms
            .alloc(RandomSource::new(
                "n",
                DistributionKind::Normal,
                [0.0, 1.0],
                [0, 0],
            ))
            .unwrap();

        let mut a = Source::new(SourceSpec::random(id));
        let mut b = Source::new(SourceSpec::random(id));
        srcs.initialize(&mut a).unwrap();
        srcs.initialize(&mut b).unwrap();

        assert_ne!(a.buffer, b.buffer);
    }
}
