use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use log::{debug, info};
use serde::{Serialize, Serializer};

use crate::diagnostics::{Diagnostics, NumericalSummary};
use crate::error::{Error, Result};
use crate::layout::{Quantity, StateLayout};
use crate::mesh::Mesh;
use crate::rhs::{Fluxes, RIVER_COMPONENTS};




/**
 * A reported quantity. Each channel has one value per element or per river
 * segment, and a short name used as the suffix of its output file.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Groundwater,
    Surface,
    CanopyEvaporation,
    Transpiration,
    GroundEvaporation,
    Interception,
    Snow,
    RiverFlux(usize),
    Stage,
    Unsaturated,
    Recharge,
    RiverBed,
    Infiltration,
}

impl Channel {

    /// All channels, in the order they are written.
    pub fn all() -> Vec<Channel> {
        use Channel::*;

        let mut channels = vec![
            Groundwater,
            Surface,
            CanopyEvaporation,
            Transpiration,
            GroundEvaporation,
            Interception,
            Snow,
        ];
        channels.extend((0..RIVER_COMPONENTS).map(RiverFlux));
        channels.extend([Stage, Unsaturated, Recharge, RiverBed, Infiltration]);
        channels
    }

    pub fn suffix(&self) -> String {
        use Channel::*;

        match self {
            Groundwater => "GW".into(),
            Surface => "surf".into(),
            CanopyEvaporation => "et0".into(),
            Transpiration => "et1".into(),
            GroundEvaporation => "et2".into(),
            Interception => "is".into(),
            Snow => "snow".into(),
            RiverFlux(n) => format!("rivFlx{}", n),
            Stage => "stage".into(),
            Unsaturated => "unsat".into(),
            Recharge => "Rech".into(),
            RiverBed => "rbed".into(),
            Infiltration => "infil".into(),
        }
    }

    pub fn is_river(&self) -> bool {
        matches!(self, Channel::RiverFlux(_) | Channel::Stage | Channel::RiverBed)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{}", self.suffix())
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.suffix())
    }
}




#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub channel: Channel,
    pub values: Vec<f64>,
}




/**
 * Everything handed to a sink at one reporting boundary.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Frame {
    pub time: f64,
    pub records: Vec<Record>,
    pub numerics: NumericalSummary,
}




// ============================================================================
impl Frame {

    /**
     * Assemble a frame from the state, the diagnostic fields and the flux
     * breakdown at that state. Storages are reported after clamping.
     */
    pub fn capture(
        time: f64,
        mesh: &Mesh,
        state: &[f64],
        diagnostics: &Diagnostics,
        fluxes: &Fluxes,
        numerics: NumericalSummary) -> Self
    {
        let layout = StateLayout::for_mesh(mesh);
        let store = |quantity| layout.block(quantity, state).iter().map(|y| y.max(0.0)).collect::<Vec<_>>();

        let records = Channel::all()
            .into_iter()
            .map(|channel| {
                let values = match channel {
                    Channel::Groundwater => store(Quantity::Groundwater),
                    Channel::Surface => store(Quantity::Surface),
                    Channel::CanopyEvaporation => diagnostics.canopy_evaporation.clone(),
                    Channel::Transpiration => diagnostics.transpiration.clone(),
                    Channel::GroundEvaporation => diagnostics.ground_evaporation.clone(),
                    Channel::Interception => diagnostics.canopy.clone(),
                    Channel::Snow => diagnostics.snow.clone(),
                    Channel::RiverFlux(n) => (0..mesh.num_rivers())
                        .map(|r| fluxes.river_components(mesh, r)[n])
                        .collect(),
                    Channel::Stage => store(Quantity::Stage),
                    Channel::Unsaturated => store(Quantity::Unsaturated),
                    Channel::Recharge => fluxes.recharge_rates(mesh),
                    Channel::RiverBed => store(Quantity::RiverBed),
                    Channel::Infiltration => fluxes.infiltration_rates(mesh),
                };
                Record { channel, values }
            })
            .collect();

        Self { time, records, numerics }
    }

    pub fn get(&self, channel: Channel) -> Option<&[f64]> {
        self.records
            .iter()
            .find(|r| r.channel == channel)
            .map(|r| r.values.as_slice())
    }
}




/**
 * Receives a frame at every reporting boundary, in order of increasing time.
 * Reporting calls never overlap: each returns before the next begins.
 */
pub trait Sink {
    fn report(&mut self, frame: &Frame) -> Result<()>;

    /// Flush whatever is buffered; called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

fn check_order(last: &mut Option<f64>, time: f64) -> Result<()> {
    match *last {
        Some(t) if time <= t => Err(Error::Report(format!("frame at t={} follows t={}", time, t))),
        _ => {
            *last = Some(time);
            Ok(())
        }
    }
}




// ============================================================================
/**
 * Keeps every frame in memory.
 */
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<Frame>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn times(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.time).collect()
    }
}

impl Sink for MemorySink {
    fn report(&mut self, frame: &Frame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }
}




// ============================================================================
/**
 * Writes one text file per channel, named `<prefix>.<suffix>`, with one row
 * per frame: the time followed by the channel values, tab separated. A
 * further `<prefix>.numerics` file records the numerical summary.
 */
pub struct TextSink {
    files: Vec<(Channel, BufWriter<File>)>,
    numerics: BufWriter<File>,
    last: Option<f64>,
}

impl TextSink {
    pub fn create(directory: &Path, prefix: &str) -> Result<Self> {
        std::fs::create_dir_all(directory)?;

        let path = |suffix: &str| -> PathBuf { directory.join(format!("{}.{}", prefix, suffix)) };
        let files = Channel::all()
            .into_iter()
            .map(|c| -> Result<(Channel, BufWriter<File>)> {
                Ok((c, BufWriter::new(File::create(path(&c.suffix()))?)))
            })
            .collect::<Result<Vec<_>>>()?;
        let numerics = BufWriter::new(File::create(path("numerics"))?);

        info!("writing text output to {}", directory.display());

        Ok(Self {
            files,
            numerics,
            last: None,
        })
    }
}

impl Sink for TextSink {
    fn report(&mut self, frame: &Frame) -> Result<()> {
        check_order(&mut self.last, frame.time)?;

        for (channel, file) in &mut self.files {
            write!(file, "{}", frame.time)?;

            for value in frame.get(*channel).unwrap_or(&[]) {
                write!(file, "\t{:e}", value)?;
            }
            writeln!(file)?;
        }

        let n = &frame.numerics;
        writeln!(
            self.numerics,
            "{}\t{}\t{}\t{}\t{}",
            frame.time,
            n.interval.evaluations,
            n.interval.clamped,
            n.interval.floored,
            n.warning as u8)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for (_, file) in &mut self.files {
            file.flush()?;
        }
        self.numerics.flush()?;
        Ok(())
    }
}




// ============================================================================
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Cbor,
    MessagePack,
}

/**
 * Writes frames as a stream of self-delimiting CBOR or MessagePack values.
 */
pub struct EncodedSink<W: Write> {
    writer: W,
    format: Format,
    last: Option<f64>,
}

impl<W: Write> EncodedSink<W> {
    pub fn new(writer: W, format: Format) -> Self {
        Self {
            writer,
            format,
            last: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl EncodedSink<BufWriter<File>> {
    pub fn create(path: &Path, format: Format) -> Result<Self> {
        info!("writing {:?} output to {}", format, path.display());
        Ok(Self::new(BufWriter::new(File::create(path)?), format))
    }
}

impl<W: Write> Sink for EncodedSink<W> {
    fn report(&mut self, frame: &Frame) -> Result<()> {
        check_order(&mut self.last, frame.time)?;

        match self.format {
            Format::Cbor => {
                ciborium::ser::into_writer(frame, &mut self.writer)
                    .map_err(|e| Error::Report(format!("{:?}", e)))
            }
            Format::MessagePack => {
                rmp_serde::encode::write(&mut self.writer, frame)
                    .map_err(|e| Error::Report(e.to_string()))
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}




// ============================================================================
/**
 * Moves persistence onto a writer thread. Frames travel through a bounded
 * channel, so they are written in the order they were reported, and the
 * controller blocks when the writer falls behind. An error on the writer
 * thread stops it; the error is returned by the next call.
 */
pub struct ThreadedSink {
    sender: Option<Sender<Frame>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl ThreadedSink {
    pub fn spawn<S: Sink + Send + 'static>(mut inner: S, capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded::<Frame>(capacity);

        let handle = thread::spawn(move || {
            for frame in receiver {
                inner.report(&frame)?;
                debug!("wrote frame at t={}", frame.time);
            }
            inner.finish()
        });

        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    fn join(&mut self) -> Result<()> {
        self.sender.take();

        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Report("writer thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Sink for ThreadedSink {
    fn report(&mut self, frame: &Frame) -> Result<()> {
        let sent = match &self.sender {
            Some(sender) => sender.send(frame.clone()).is_ok(),
            None => false,
        };

        if sent {
            Ok(())
        } else {
            self.join()?;
            Err(Error::Report("writer thread has stopped".into()))
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.join()
    }
}

impl Drop for ThreadedSink {
    fn drop(&mut self) {
        let _ = self.join();
    }
}
