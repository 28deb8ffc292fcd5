//! Binary persistence of a whole simulation: sources, state machines,
//! models and the connection set.
//!
//! The stream is a tagged sequence in native endianness (doubles are plain
//! IEEE-754 bit patterns): a fixed header, entity counts, each entity's
//! fields in declaration order, then one `(src_index, src_port, dst_index,
//! dst_port)` tuple per connection until end of stream.
//!
//! Reading and writing share one code path: every entity describes its
//! fields once against the [`Codec`] trait, and the two implementations
//! either copy fields out to the writer or fill them from the reader. This
//! keeps the field order definitionally symmetric.

use std::io::{Read, Write};

use core_arena::ArenaId;
use core_hsm::{
    Action, ActionKind, Condition, ConditionKind, INVALID_STATE, MachineOptions, Operand,
    StateMachine, Variable,
};
use core_source::{
    BinaryFileSource, ConstantSource, DistributionKind, RandomSource, Source, SourceKind,
    SourceSpec, TextFileSource,
};

use crate::dynamics::{Dynamics, DynamicsKind};
use crate::simulation::Simulation;
use crate::{HsmId, ModelId};

pub const ARCHIVE_MAGIC: u32 = 0x1122_3344;
pub const ARCHIVE_VERSION: u32 = 1;
/// The only supported archive mode: everything in one stream.
pub const ARCHIVE_MODE_ALL: u32 = 0;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic number")]
    BadMagic,
    #[error("unsupported archive version")]
    UnsupportedVersion,
    #[error("corrupt archive: {0}")]
    Corrupt(&'static str),
}

/// Field-order-symmetric reader/writer. Implemented by [`Writer`] (copies
/// each field out) and [`Reader`] (fills each field in).
pub trait Codec {
    /// True on the reading side; the rare asymmetric spots (length-prefixed
    /// strings) branch on it.
    fn is_reader(&self) -> bool;

    fn u8(&mut self, v: &mut u8) -> Result<(), ArchiveError>;
    fn u16(&mut self, v: &mut u16) -> Result<(), ArchiveError>;
    fn u32(&mut self, v: &mut u32) -> Result<(), ArchiveError>;
    fn u64(&mut self, v: &mut u64) -> Result<(), ArchiveError>;
    fn i32(&mut self, v: &mut i32) -> Result<(), ArchiveError>;
    fn i64(&mut self, v: &mut i64) -> Result<(), ArchiveError>;
    fn f64(&mut self, v: &mut f64) -> Result<(), ArchiveError>;

    fn bool(&mut self, v: &mut bool) -> Result<(), ArchiveError> {
        let mut raw = u8::from(*v);
        self.u8(&mut raw)?;
        *v = raw != 0;
        Ok(())
    }

    fn f64s(&mut self, values: &mut [f64]) -> Result<(), ArchiveError> {
        for v in values {
            self.f64(v)?;
        }
        Ok(())
    }

    fn i64s(&mut self, values: &mut [i64]) -> Result<(), ArchiveError> {
        for v in values {
            self.i64(v)?;
        }
        Ok(())
    }
}

pub struct Writer<W: Write> {
    out: W,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

macro_rules! write_field {
    ($($name:ident: $ty:ty),+ $(,)?) => {
        $(fn $name(&mut self, v: &mut $ty) -> Result<(), ArchiveError> {
            self.out.write_all(&v.to_ne_bytes())?;
            Ok(())
        })+
    };
}

impl<W: Write> Codec for Writer<W> {
    fn is_reader(&self) -> bool {
        false
    }

    write_field! {
        u8: u8,
        u16: u16,
        u32: u32,
        u64: u64,
        i32: i32,
        i64: i64,
        f64: f64,
    }
}

pub struct Reader<R: Read> {
    input: R,
}

impl<R: Read> Reader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

macro_rules! read_field {
    ($($name:ident: $ty:ty),+ $(,)?) => {
        $(fn $name(&mut self, v: &mut $ty) -> Result<(), ArchiveError> {
            let mut bytes = [0u8; size_of::<$ty>()];
            self.input.read_exact(&mut bytes)?;
            *v = <$ty>::from_ne_bytes(bytes);
            Ok(())
        })+
    };
}

impl<R: Read> Codec for Reader<R> {
    fn is_reader(&self) -> bool {
        true
    }

    read_field! {
        u8: u8,
        u16: u16,
        u32: u32,
        u64: u64,
        i32: i32,
        i64: i64,
        f64: f64,
    }
}

/// Persist a source handle: the provider reference plus its restore state.
/// The runtime chunk buffer is deliberately not persisted.
pub(crate) fn persist_source(src: &mut Source, io: &mut dyn Codec) -> Result<(), ArchiveError> {
    let mut spec = SourceSpec::encode(src.spec);
    io.i64(&mut spec)?;
    src.spec = SourceSpec::decode(spec);

    for slot in &mut src.chunk_id {
        io.u64(slot)?;
    }
    io.f64s(&mut src.chunk_real)?;
    Ok(())
}

fn persist_string(value: &mut String, io: &mut dyn Codec) -> Result<(), ArchiveError> {
    let mut len = u32::try_from(value.len()).map_err(|_| ArchiveError::Corrupt("string len"))?;
    io.u32(&mut len)?;

    if io.is_reader() {
        let mut bytes = vec![0u8; len as usize];
        for byte in &mut bytes {
            io.u8(byte)?;
        }
        *value = String::from_utf8(bytes).map_err(|_| ArchiveError::Corrupt("string utf8"))?;
    } else {
        for byte in value.clone().into_bytes() {
            let mut out = byte;
            io.u8(&mut out)?;
        }
    }
    Ok(())
}

fn variable_tag(var: Variable) -> u8 {
    match var {
        Variable::None => 0,
        Variable::Port0 => 1,
        Variable::Port1 => 2,
        Variable::Port2 => 3,
        Variable::Port3 => 4,
        Variable::I1 => 5,
        Variable::I2 => 6,
        Variable::R1 => 7,
        Variable::R2 => 8,
        Variable::Timer => 9,
        Variable::ConstantI => 10,
        Variable::ConstantR => 11,
        Variable::MachineConstant(k) => 12 + k.min(7),
        Variable::Source => 20,
    }
}

fn variable_from_tag(tag: u8) -> Result<Variable, ArchiveError> {
    Ok(match tag {
        0 => Variable::None,
        1 => Variable::Port0,
        2 => Variable::Port1,
        3 => Variable::Port2,
        4 => Variable::Port3,
        5 => Variable::I1,
        6 => Variable::I2,
        7 => Variable::R1,
        8 => Variable::R2,
        9 => Variable::Timer,
        10 => Variable::ConstantI,
        11 => Variable::ConstantR,
        12..=19 => Variable::MachineConstant(tag - 12),
        20 => Variable::Source,
        _ => return Err(ArchiveError::Corrupt("hsm variable tag")),
    })
}

fn persist_variable(var: &mut Variable, io: &mut dyn Codec) -> Result<(), ArchiveError> {
    let mut tag = variable_tag(*var);
    io.u8(&mut tag)?;
    *var = variable_from_tag(tag)?;
    Ok(())
}

fn persist_operand(operand: &mut Operand, io: &mut dyn Codec) -> Result<(), ArchiveError> {
    let (mut tag, mut int, mut real) = match *operand {
        Operand::Var(v) => (0u8, variable_tag(v) as i32, 0.0f64),
        Operand::Int(i) => (1, i, 0.0),
        Operand::Real(r) => (2, 0, r as f64),
    };
    io.u8(&mut tag)?;
    io.i32(&mut int)?;
    io.f64(&mut real)?;

    *operand = match tag {
        0 => Operand::Var(variable_from_tag(
            u8::try_from(int).map_err(|_| ArchiveError::Corrupt("operand var"))?,
        )?),
        1 => Operand::Int(int),
        2 => Operand::Real(real as f32),
        _ => return Err(ArchiveError::Corrupt("operand tag")),
    };
    Ok(())
}

fn action_kind_tag(kind: ActionKind) -> u8 {
    use ActionKind::*;
    match kind {
        None => 0,
        SetPort => 1,
        UnsetPort => 2,
        ResetPorts => 3,
        Output => 4,
        Affect => 5,
        Plus => 6,
        Minus => 7,
        Negate => 8,
        Multiplies => 9,
        Divides => 10,
        Modulus => 11,
        BitAnd => 12,
        BitOr => 13,
        BitNot => 14,
        BitXor => 15,
    }
}

fn action_kind_from_tag(tag: u8) -> Result<ActionKind, ArchiveError> {
    use ActionKind::*;
    Ok(match tag {
        0 => None,
        1 => SetPort,
        2 => UnsetPort,
        3 => ResetPorts,
        4 => Output,
        5 => Affect,
        6 => Plus,
        7 => Minus,
        8 => Negate,
        9 => Multiplies,
        10 => Divides,
        11 => Modulus,
        12 => BitAnd,
        13 => BitOr,
        14 => BitNot,
        15 => BitXor,
        _ => return Err(ArchiveError::Corrupt("hsm action tag")),
    })
}

fn persist_action(action: &mut Action, io: &mut dyn Codec) -> Result<(), ArchiveError> {
    let mut tag = action_kind_tag(action.kind);
    io.u8(&mut tag)?;
    action.kind = action_kind_from_tag(tag)?;

    persist_variable(&mut action.var, io)?;
    persist_operand(&mut action.operand, io)
}

fn condition_kind_tag(kind: ConditionKind) -> u8 {
    use ConditionKind::*;
    match kind {
        None => 0,
        Port => 1,
        Sigma => 2,
        Equal => 3,
        NotEqual => 4,
        Greater => 5,
        GreaterEqual => 6,
        Less => 7,
        LessEqual => 8,
    }
}

fn condition_kind_from_tag(tag: u8) -> Result<ConditionKind, ArchiveError> {
    use ConditionKind::*;
    Ok(match tag {
        0 => None,
        1 => Port,
        2 => Sigma,
        3 => Equal,
        4 => NotEqual,
        5 => Greater,
        6 => GreaterEqual,
        7 => Less,
        8 => LessEqual,
        _ => return Err(ArchiveError::Corrupt("hsm condition tag")),
    })
}

fn persist_condition(condition: &mut Condition, io: &mut dyn Codec) -> Result<(), ArchiveError> {
    let mut tag = condition_kind_tag(condition.kind);
    io.u8(&mut tag)?;
    condition.kind = condition_kind_from_tag(tag)?;

    persist_variable(&mut condition.var, io)?;
    persist_operand(&mut condition.operand, io)?;
    io.u8(&mut condition.port_value)?;
    io.u8(&mut condition.port_mask)
}

fn persist_machine(machine: &mut StateMachine, io: &mut dyn Codec) -> Result<(), ArchiveError> {
    let mut used = machine.compute_max_state_used() as u32;
    io.u32(&mut used)?;
    if used as usize > core_hsm::MAX_STATES {
        return Err(ArchiveError::Corrupt("hsm state count"));
    }

    for index in 0..used as usize {
        let state = &mut machine.states[index];
        persist_action(&mut state.enter_action, io)?;
        persist_action(&mut state.exit_action, io)?;
        persist_action(&mut state.if_action, io)?;
        persist_action(&mut state.else_action, io)?;
        persist_condition(&mut state.condition, io)?;
        io.u8(&mut state.if_transition)?;
        io.u8(&mut state.else_transition)?;
        io.u8(&mut state.super_id)?;
        io.u8(&mut state.sub_id)?;
    }

    io.f64s(&mut machine.constants)?;
    io.u8(&mut machine.top_state)?;

    let mut flags = machine.flags.bits();
    io.u8(&mut flags)?;
    machine.flags = MachineOptions::from_bits_truncate(flags);
    Ok(())
}

struct Counts {
    constants: u32,
    binary_files: u32,
    text_files: u32,
    randoms: u32,
    models: u32,
    hsms: u32,
}

fn persist_header(counts: &mut Counts, io: &mut dyn Codec) -> Result<(), ArchiveError> {
    let mut magic = ARCHIVE_MAGIC;
    let mut length = 16u32;
    let mut version = ARCHIVE_VERSION;
    let mut mode = ARCHIVE_MODE_ALL;

    io.u32(&mut magic)?;
    io.u32(&mut length)?;
    io.u32(&mut version)?;
    io.u32(&mut mode)?;

    if magic != ARCHIVE_MAGIC {
        return Err(ArchiveError::BadMagic);
    }
    if version != ARCHIVE_VERSION || mode != ARCHIVE_MODE_ALL {
        return Err(ArchiveError::UnsupportedVersion);
    }

    io.u32(&mut counts.constants)?;
    io.u32(&mut counts.binary_files)?;
    io.u32(&mut counts.text_files)?;
    io.u32(&mut counts.randoms)?;
    io.u32(&mut counts.models)?;
    io.u32(&mut counts.hsms)
}

/// Serialize the whole simulation into `out`.
pub fn archive<W: Write>(sim: &mut Simulation, out: W) -> Result<(), ArchiveError> {
    let mut io = Writer::new(out);

    let mut counts = Counts {
        constants: sim.env.srcs.constants.len() as u32,
        binary_files: sim.env.srcs.binary_files.len() as u32,
        text_files: sim.env.srcs.text_files.len() as u32,
        randoms: sim.env.srcs.randoms.len() as u32,
        models: sim.models.len() as u32,
        hsms: sim.env.hsms.len() as u32,
    };
    persist_header(&mut counts, &mut io)?;

    for (id, provider) in sim.env.srcs.constants.iter_mut() {
        let mut index = id.index();
        io.u32(&mut index)?;
        persist_string(&mut provider.name, &mut io)?;

        let mut len = provider.data.len() as u32;
        io.u32(&mut len)?;
        io.f64s(&mut provider.data)?;
    }

    for (id, provider) in sim.env.srcs.binary_files.iter_mut() {
        let mut index = id.index();
        io.u32(&mut index)?;
        persist_string(&mut provider.name, &mut io)?;

        let mut path = provider.path.display().to_string();
        persist_string(&mut path, &mut io)?;
        let mut max_clients = provider.max_clients;
        io.u32(&mut max_clients)?;
    }

    for (id, provider) in sim.env.srcs.text_files.iter_mut() {
        let mut index = id.index();
        io.u32(&mut index)?;
        persist_string(&mut provider.name, &mut io)?;

        let mut path = provider.path.display().to_string();
        persist_string(&mut path, &mut io)?;
    }

    for (id, provider) in sim.env.srcs.randoms.iter_mut() {
        let mut index = id.index();
        io.u32(&mut index)?;
        persist_string(&mut provider.name, &mut io)?;

        let mut distribution = provider.distribution as u8;
        io.u8(&mut distribution)?;
        io.f64s(&mut provider.reals)?;
        let mut ints = [provider.ints[0], provider.ints[1]];
        io.i32(&mut ints[0])?;
        io.i32(&mut ints[1])?;
    }

    for (id, machine) in sim.env.hsms.iter_mut() {
        let mut index = id.index();
        io.u32(&mut index)?;
        persist_machine(machine, &mut io)?;
    }

    let model_ids: Vec<ModelId> = sim.models.ids().collect();
    for id in &model_ids {
        // The parameter table is the authoritative configuration; the
        // payload only holds it after `initialize` has projected it in.
        let mut parameter = *sim.parameter(*id).expect("listed model");

        let model = sim.models.get_mut(*id).expect("listed model");
        let mut index = id.index();
        io.u32(&mut index)?;

        let mut kind = model.dynamics.kind().ordinal();
        io.u8(&mut kind)?;
        io.f64(&mut model.tl)?;
        io.f64(&mut model.tn)?;

        io.f64s(&mut parameter.reals)?;
        io.i64s(&mut parameter.integers)?;

        model.dynamics.persist(&mut io)?;
    }

    // Connections: one tuple per live edge, until end of stream.
    for id in &model_ids {
        let src_index = id.index();
        let ports: Vec<(u8, crate::OutputPortId)> = {
            let model = sim.models.get(*id).expect("listed model");
            model
                .dynamics
                .output_ports()
                .iter()
                .enumerate()
                .map(|(i, y)| (i as u8, *y))
                .collect()
        };

        for (port_index, y_id) in ports {
            let Some(port) = sim.env.output_ports.get(y_id) else {
                continue;
            };

            let mut emit = |edge: &crate::Edge| -> Result<(), ArchiveError> {
                // Stale edges are dropped from the stream, not persisted.
                if sim.models.get(edge.model).is_none() {
                    return Ok(());
                }
                let mut tuple = [
                    src_index,
                    port_index as u32,
                    edge.model.index(),
                    edge.port as u32,
                ];
                for value in &mut tuple {
                    io.u32(value)?;
                }
                Ok(())
            };

            for edge in port.edges.iter() {
                emit(edge)?;
            }
            let mut block_id = port.next;
            while let Some(block) = sim.env.blocks.get(block_id) {
                for edge in block.edges.iter() {
                    emit(edge)?;
                }
                block_id = block.next;
            }
        }
    }

    Ok(())
}

/// Rebuild a simulation from `input` into `sim`, which must be freshly
/// created (or cleared). Entities are re-allocated in archive order; all
/// cross-references (state machine ids, source mounts, connections) are
/// remapped onto the new ids.
pub fn dearchive<R: Read>(sim: &mut Simulation, input: R) -> Result<(), ArchiveError> {
    let mut io = Reader::new(input);

    let mut counts = Counts {
        constants: 0,
        binary_files: 0,
        text_files: 0,
        randoms: 0,
        models: 0,
        hsms: 0,
    };
    persist_header(&mut counts, &mut io)?;

    let mut constant_map = std::collections::HashMap::new();
    for _ in 0..counts.constants {
        let mut index = 0u32;
        io.u32(&mut index)?;

        let mut provider = ConstantSource::default();
        persist_string(&mut provider.name, &mut io)?;

        let mut len = 0u32;
        io.u32(&mut len)?;
        provider.data = vec![0.0; len as usize];
        io.f64s(&mut provider.data)?;

        let id = sim
            .env
            .srcs
            .constants
            .alloc(provider)
            .ok_or(ArchiveError::Corrupt("constant source arena"))?;
        constant_map.insert(index, id);
    }

    let mut binary_map = std::collections::HashMap::new();
    for _ in 0..counts.binary_files {
        let mut index = 0u32;
        io.u32(&mut index)?;

        let mut name = String::new();
        persist_string(&mut name, &mut io)?;
        let mut path = String::new();
        persist_string(&mut path, &mut io)?;
        let mut max_clients = 0u32;
        io.u32(&mut max_clients)?;

        let provider = BinaryFileSource::new(name, path).with_max_clients(max_clients);
        let id = sim
            .env
            .srcs
            .binary_files
            .alloc(provider)
            .ok_or(ArchiveError::Corrupt("binary source arena"))?;
        binary_map.insert(index, id);
    }

    let mut text_map = std::collections::HashMap::new();
    for _ in 0..counts.text_files {
        let mut index = 0u32;
        io.u32(&mut index)?;

        let mut name = String::new();
        persist_string(&mut name, &mut io)?;
        let mut path = String::new();
        persist_string(&mut path, &mut io)?;

        let id = sim
            .env
            .srcs
            .text_files
            .alloc(TextFileSource::new(name, path))
            .ok_or(ArchiveError::Corrupt("text source arena"))?;
        text_map.insert(index, id);
    }

    let mut random_map = std::collections::HashMap::new();
    for _ in 0..counts.randoms {
        let mut index = 0u32;
        io.u32(&mut index)?;

        let mut name = String::new();
        persist_string(&mut name, &mut io)?;
        let mut distribution = 0u8;
        io.u8(&mut distribution)?;
        let mut reals = [0.0f64; 2];
        io.f64s(&mut reals)?;
        let mut ints = [0i32; 2];
        io.i32(&mut ints[0])?;
        io.i32(&mut ints[1])?;

        let kind = DistributionKind::from_u8(distribution)
            .ok_or(ArchiveError::Corrupt("distribution tag"))?;
        let id = sim
            .env
            .srcs
            .randoms
            .alloc(RandomSource::new(name, kind, reals, ints))
            .ok_or(ArchiveError::Corrupt("random source arena"))?;
        random_map.insert(index, id);
    }

    let mut hsm_map: std::collections::HashMap<u32, HsmId> = std::collections::HashMap::new();
    for _ in 0..counts.hsms {
        let mut index = 0u32;
        io.u32(&mut index)?;

        let mut machine = StateMachine::new();
        persist_machine(&mut machine, &mut io)?;
        if machine.top_state != INVALID_STATE
            && machine.top_state as usize >= core_hsm::MAX_STATES
        {
            return Err(ArchiveError::Corrupt("hsm top state"));
        }

        let id = sim
            .env
            .hsms
            .alloc(machine)
            .ok_or(ArchiveError::Corrupt("hsm arena"))?;
        hsm_map.insert(index, id);
    }

    let remap_spec = |spec: Option<SourceSpec>| -> Result<Option<SourceSpec>, ArchiveError> {
        let Some(spec) = spec else {
            return Ok(None);
        };
        let old_index = match spec.kind {
            SourceKind::Constant => core_source::ConstantSourceId::from_raw(spec.raw()).index(),
            SourceKind::BinaryFile => {
                core_source::BinaryFileSourceId::from_raw(spec.raw()).index()
            }
            SourceKind::TextFile => core_source::TextFileSourceId::from_raw(spec.raw()).index(),
            SourceKind::Random => core_source::RandomSourceId::from_raw(spec.raw()).index(),
        };
        let remapped = match spec.kind {
            SourceKind::Constant => constant_map
                .get(&old_index)
                .map(|id| SourceSpec::constant(*id)),
            SourceKind::BinaryFile => binary_map
                .get(&old_index)
                .map(|id| SourceSpec::binary_file(*id)),
            SourceKind::TextFile => text_map
                .get(&old_index)
                .map(|id| SourceSpec::text_file(*id)),
            SourceKind::Random => random_map.get(&old_index).map(|id| SourceSpec::random(*id)),
        };
        remapped
            .map(Some)
            .ok_or(ArchiveError::Corrupt("dangling source reference"))
    };

    let mut model_map: std::collections::HashMap<u32, ModelId> = std::collections::HashMap::new();
    for _ in 0..counts.models {
        let mut index = 0u32;
        io.u32(&mut index)?;

        let mut kind_tag = 0u8;
        io.u8(&mut kind_tag)?;
        let kind = DynamicsKind::from_ordinal(kind_tag)
            .ok_or(ArchiveError::Corrupt("dynamics kind tag"))?;

        let id = sim
            .alloc(kind)
            .map_err(|_| ArchiveError::Corrupt("model arena"))?;
        let model = sim.models.get_mut(id).expect("just allocated");

        io.f64(&mut model.tl)?;
        io.f64(&mut model.tn)?;

        let mut parameter = crate::Parameter::default();
        io.f64s(&mut parameter.reals)?;
        io.i64s(&mut parameter.integers)?;

        model.dynamics.persist(&mut io)?;

        // Remap every provider reference the payload carries.
        match &mut model.dynamics {
            Dynamics::Generator(generator) => {
                generator.source_ta.spec = remap_spec(generator.source_ta.spec)?;
                generator.source_value.spec = remap_spec(generator.source_value.spec)?;
            }
            Dynamics::DynamicQueue(queue) => {
                queue.source_ta.spec = remap_spec(queue.source_ta.spec)?;
            }
            Dynamics::PriorityQueue(queue) => {
                queue.source_ta.spec = remap_spec(queue.source_ta.spec)?;
            }
            Dynamics::HsmWrapper(wrapper) => {
                wrapper.exec.source_value.spec = remap_spec(wrapper.exec.source_value.spec)?;
                if wrapper.id.is_defined() {
                    let old_index = wrapper.id.index();
                    wrapper.id = *hsm_map
                        .get(&old_index)
                        .ok_or(ArchiveError::Corrupt("dangling hsm reference"))?;
                }
            }
            _ => {}
        }

        // The parameter slots carry the same references in packed form;
        // only slots the kind actually treats as references are touched.
        let mut remapped_parameter = remap_parameter_sources(kind, parameter, &remap_spec)?;
        if kind == DynamicsKind::HsmWrapper {
            let old_raw = remapped_parameter.integers[0] as u32;
            if remapped_parameter.integers[0] >= 0 && old_raw != u32::MAX {
                let old_index = HsmId::from_raw(old_raw).index();
                let new_id = hsm_map
                    .get(&old_index)
                    .ok_or(ArchiveError::Corrupt("dangling hsm reference"))?;
                remapped_parameter.integers[0] = new_id.raw() as i64;
            }
        }
        sim.set_parameter(id, remapped_parameter);

        model_map.insert(index, id);
    }

    // Connection tuples until end of stream.
    loop {
        let mut tuple = [0u32; 4];
        let mut read = 0;
        let mut eof = false;
        for value in &mut tuple {
            match io.u32(value) {
                Ok(()) => read += 1,
                Err(ArchiveError::Io(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof && read == 0 =>
                {
                    eof = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        if eof {
            break;
        }

        let [src_index, src_port, dst_index, dst_port] = tuple;
        let src = *model_map
            .get(&src_index)
            .ok_or(ArchiveError::Corrupt("connection source"))?;
        let dst = *model_map
            .get(&dst_index)
            .ok_or(ArchiveError::Corrupt("connection target"))?;

        sim.connect(src, src_port as u8, dst, dst_port as u8)
            .map_err(|_| ArchiveError::Corrupt("connection rejected"))?;
    }

    Ok(())
}

fn remap_parameter_sources(
    kind: DynamicsKind,
    mut parameter: crate::Parameter,
    remap: &impl Fn(Option<SourceSpec>) -> Result<Option<SourceSpec>, ArchiveError>,
) -> Result<crate::Parameter, ArchiveError> {
    let slots: &[usize] = match kind {
        DynamicsKind::Generator => &[0, 1],
        DynamicsKind::DynamicQueue | DynamicsKind::PriorityQueue => &[0],
        _ => &[],
    };

    for &slot in slots {
        let spec = SourceSpec::decode(parameter.integers[slot]);
        parameter.integers[slot] = SourceSpec::encode(remap(spec)?);
    }
    Ok(parameter)
}
