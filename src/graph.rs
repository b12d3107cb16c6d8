//! Arena of stages and the links between their ports.
//!
//! Stages are addressed by [`StageId`], links by [`LinkId`]. Each port
//! stores the id of its link and each link stores both of its ends, so no
//! stage ever holds a reference to another.

use crate::error::{Result, StreamError};
use crate::metrics::StageMetrics;
use crate::stage::Stage;
use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::mem;

/// Type-erased element travelling over a link
pub type DynValue = Box<dyn Any + Send>;

pub(crate) fn downcast<T: 'static>(value: DynValue) -> Result<T> {
    value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        StreamError::protocol(format!("element is not a {}", type_name::<T>()))
    })
}

/// Index of a stage slot in its [`Graph`].
///
/// Slots of nested stages are recycled once those stages finish, so an id
/// taken from a running pipeline may later name a different stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub(crate) usize);

impl StageId {
    /// Position of the slot in the arena
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Index of a link in its [`Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) usize);

/// Typed handle to an output port of a stage
pub struct Outlet<T> {
    stage: StageId,
    port: usize,
    _marker: PhantomData<fn() -> T>,
}

/// Typed handle to an input port of a stage
pub struct Inlet<T> {
    stage: StageId,
    port: usize,
    _marker: PhantomData<fn(T)>,
}

macro_rules! port_handle {
    ($name:ident) => {
        impl<T> $name<T> {
            /// Handle to port number `port` of `stage`; nothing is checked
            /// until the handle is used to connect
            pub fn new(stage: StageId, port: usize) -> Self {
                Self {
                    stage,
                    port,
                    _marker: PhantomData,
                }
            }

            /// Stage owning the port
            pub fn stage(&self) -> StageId {
                self.stage
            }

            /// Index of the port among the stage's ports of the same direction
            pub fn port(&self) -> usize {
                self.port
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}:{})", stringify!($name), self.stage.0, self.port)
            }
        }
    };
}

port_handle!(Outlet);
port_handle!(Inlet);

/// What currently sits on a link: nothing, one unit of demand, or one element
pub(crate) enum Transfer {
    Idle,
    Demanded,
    Pushed(DynValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkState {
    Open,
    /// Closed by the upstream stage
    Completed,
    /// Closed by the upstream stage with an error
    Failed,
    /// Closed by the downstream stage
    Cancelled,
}

pub(crate) struct Link {
    pub(crate) upstream: (StageId, usize),
    pub(crate) downstream: (StageId, usize),
    pub(crate) transfer: Transfer,
    pub(crate) state: LinkState,
    /// Cleared when the stage at that end lets go of its port
    pub(crate) upstream_attached: bool,
    pub(crate) downstream_attached: bool,
    /// Signals travelling over the link and not yet dispatched
    pub(crate) queued: usize,
    pub(crate) vacant: bool,
}

impl Link {
    fn new(upstream: (StageId, usize), downstream: (StageId, usize)) -> Self {
        Self {
            upstream,
            downstream,
            transfer: Transfer::Idle,
            state: LinkState::Open,
            upstream_attached: true,
            downstream_attached: true,
            queued: 0,
            vacant: false,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }
}

/// Lifecycle of a stage inside a running pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Completed | StageState::Cancelled | StageState::Failed
        )
    }
}

pub(crate) struct StageSlot {
    pub(crate) logic: Option<Box<dyn Stage>>,
    pub(crate) name: String,
    pub(crate) inlets: Vec<Option<LinkId>>,
    pub(crate) outlets: Vec<Option<LinkId>>,
    /// Released inlet indices, handed out again by `add_inlet`
    pub(crate) free_inlets: Vec<usize>,
    pub(crate) state: StageState,
    /// Signals queued for this stage and not yet dispatched
    pub(crate) queued: usize,
    pub(crate) metrics: StageMetrics,
    /// Attached while running; the slot is recycled once the stage finishes
    pub(crate) nested: bool,
    pub(crate) vacant: bool,
    /// Bumped on every recycle so late async results can be told apart
    pub(crate) generation: u64,
}

impl StageSlot {
    fn new(stage: Box<dyn Stage>, inputs: usize, outputs: usize, generation: u64) -> Self {
        Self {
            name: stage.name().to_string(),
            logic: Some(stage),
            inlets: vec![None; inputs],
            outlets: vec![None; outputs],
            free_inlets: Vec::new(),
            state: StageState::Created,
            queued: 0,
            metrics: StageMetrics::new(),
            nested: false,
            vacant: false,
            generation,
        }
    }
}

/// Arena holding every stage of a pipeline and the links between them
#[derive(Default)]
pub struct Graph {
    pub(crate) stages: Vec<StageSlot>,
    pub(crate) links: Vec<Link>,
    free_stages: Vec<usize>,
    free_links: Vec<usize>,
    /// Occupied slots whose stage has not terminated
    pub(crate) running: usize,
    /// Stages added since `begin_batch`
    batch: Option<Vec<StageId>>,
}

impl Graph {
    /// An empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage with the given number of input and output ports
    pub fn add_stage<S: Stage + 'static>(
        &mut self,
        stage: S,
        inputs: usize,
        outputs: usize,
    ) -> StageId {
        let logic: Box<dyn Stage> = Box::new(stage);
        let id = match self.free_stages.pop() {
            Some(index) => {
                let generation = self.stages[index].generation;
                self.stages[index] = StageSlot::new(logic, inputs, outputs, generation);
                StageId(index)
            }
            None => {
                self.stages.push(StageSlot::new(logic, inputs, outputs, 0));
                StageId(self.stages.len() - 1)
            }
        };
        self.running += 1;
        if let Some(batch) = self.batch.as_mut() {
            batch.push(id);
        }
        id
    }

    /// Typed handle to input `port` of `stage`
    pub fn inlet<T>(&self, stage: StageId, port: usize) -> Inlet<T> {
        Inlet::new(stage, port)
    }

    /// Typed handle to output `port` of `stage`
    pub fn outlet<T>(&self, stage: StageId, port: usize) -> Outlet<T> {
        Outlet::new(stage, port)
    }

    /// Add an unconnected input port to a stage, reusing a released index
    pub(crate) fn add_inlet(&mut self, stage: StageId) -> Result<usize> {
        let slot = self.slot_mut(stage)?;
        if let Some(port) = slot.free_inlets.pop() {
            return Ok(port);
        }
        slot.inlets.push(None);
        Ok(slot.inlets.len() - 1)
    }

    /// Disconnect input `port` of `stage` and make the index reusable.
    ///
    /// The link is dropped once its upstream stage has let go of it too and
    /// no signal on it is still queued.
    pub(crate) fn release_inlet(&mut self, stage: StageId, port: usize) -> Result<()> {
        let slot = self.slot_mut(stage)?;
        let link = slot
            .inlets
            .get_mut(port)
            .ok_or_else(|| StreamError::protocol(format!("no inlet {port}")))?
            .take();
        if !slot.free_inlets.contains(&port) {
            slot.free_inlets.push(port);
        }
        if let Some(link) = link {
            self.links[link.0].downstream_attached = false;
            self.try_free_link(link);
        }
        Ok(())
    }

    /// Wire an output port to an input port
    pub fn connect<T>(&mut self, from: Outlet<T>, to: Inlet<T>) -> Result<LinkId> {
        self.check_port(from.stage(), from.port(), false)
            .map_err(|problem| StreamError::InvalidConnection(format!("{from:?} {problem}")))?;
        self.check_port(to.stage(), to.port(), true)
            .map_err(|problem| StreamError::InvalidConnection(format!("{to:?} {problem}")))?;

        let link = Link::new((from.stage(), from.port()), (to.stage(), to.port()));
        let id = match self.free_links.pop() {
            Some(index) => {
                self.links[index] = link;
                LinkId(index)
            }
            None => {
                self.links.push(link);
                LinkId(self.links.len() - 1)
            }
        };
        self.stages[from.stage().0].outlets[from.port()] = Some(id);
        self.stages[to.stage().0].inlets[to.port()] = Some(id);
        Ok(id)
    }

    fn check_port(&self, stage: StageId, port: usize, inlet: bool) -> std::result::Result<(), &'static str> {
        let slot = self
            .stages
            .get(stage.0)
            .filter(|slot| !slot.vacant)
            .ok_or("does not exist")?;
        let ports = if inlet { &slot.inlets } else { &slot.outlets };
        match ports.get(port) {
            None => Err("does not exist"),
            Some(Some(_)) => Err("is already connected"),
            Some(None) => Ok(()),
        }
    }

    /// Every port of each listed stage must be connected
    pub(crate) fn validate_stages(&self, stages: impl IntoIterator<Item = StageId>) -> Result<()> {
        for stage in stages {
            let slot = &self.stages[stage.0];
            let dangling = slot
                .inlets
                .iter()
                .chain(slot.outlets.iter())
                .any(|port| port.is_none());
            if dangling {
                return Err(StreamError::InvalidConnection(format!(
                    "stage {} ({}) has unconnected ports",
                    stage.0, slot.name
                )));
            }
        }
        Ok(())
    }

    /// Check that the graph has stages and no unconnected port
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(StreamError::InvalidConnection("graph has no stages".into()));
        }
        self.validate_stages(self.stage_ids())
    }

    /// Ids of the occupied stage slots
    pub fn stage_ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.vacant)
            .map(|(index, _)| StageId(index))
    }

    /// Number of stage slots, recycled ones included
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of link slots, recycled ones included
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn stage_name(&self, stage: StageId) -> Option<&str> {
        self.stages
            .get(stage.0)
            .filter(|slot| !slot.vacant)
            .map(|slot| slot.name.as_str())
    }

    pub(crate) fn slot_mut(&mut self, stage: StageId) -> Result<&mut StageSlot> {
        self.stages
            .get_mut(stage.0)
            .filter(|slot| !slot.vacant)
            .ok_or_else(|| StreamError::InvalidConnection(format!("no stage {}", stage.0)))
    }

    /// Start recording the stages added from now on
    pub(crate) fn begin_batch(&mut self) {
        self.batch = Some(Vec::new());
    }

    pub(crate) fn end_batch(&mut self) -> Vec<StageId> {
        self.batch.take().unwrap_or_default()
    }

    /// Undo a partially built batch: free its stages and release the inlet
    /// of `owner` it was being wired to
    pub(crate) fn discard_batch(&mut self, batch: &[StageId], owner: StageId, port: Option<usize>) {
        if let Some(port) = port {
            let _ = self.release_inlet(owner, port);
        }
        for &stage in batch {
            if !self.stages[stage.0].state.is_terminal() {
                self.running = self.running.saturating_sub(1);
            }
            self.vacate(stage);
        }
    }

    /// Recycle the slot of a stage, letting go of all its links
    pub(crate) fn vacate(&mut self, stage: StageId) {
        let slot = &mut self.stages[stage.0];
        if slot.vacant {
            return;
        }
        let inlets = mem::take(&mut slot.inlets);
        let outlets = mem::take(&mut slot.outlets);
        slot.free_inlets.clear();
        slot.logic = None;
        slot.nested = false;
        slot.vacant = true;
        slot.generation += 1;
        self.free_stages.push(stage.0);
        for link in inlets.into_iter().flatten() {
            self.links[link.0].downstream_attached = false;
            self.try_free_link(link);
        }
        for link in outlets.into_iter().flatten() {
            self.links[link.0].upstream_attached = false;
            self.try_free_link(link);
        }
    }

    /// Free a link nobody is attached to and nothing is queued on
    pub(crate) fn try_free_link(&mut self, id: LinkId) {
        let link = &mut self.links[id.0];
        if link.vacant || link.upstream_attached || link.downstream_attached || link.queued > 0 {
            return;
        }
        link.vacant = true;
        link.transfer = Transfer::Idle;
        self.free_links.push(id.0);
    }

    /// All ports closed and nothing left in flight towards the stage
    pub(crate) fn is_finished(&self, stage: StageId) -> bool {
        let slot = &self.stages[stage.0];
        slot.queued == 0
            && slot
                .inlets
                .iter()
                .chain(slot.outlets.iter())
                .flatten()
                .all(|link| !self.links[link.0].is_open())
    }

    /// Classify how a finished stage ended
    pub(crate) fn terminal_state(&self, stage: StageId) -> StageState {
        let slot = &self.stages[stage.0];
        let outlet_states: Vec<LinkState> = slot
            .outlets
            .iter()
            .flatten()
            .map(|link| self.links[link.0].state)
            .collect();
        if outlet_states.is_empty() {
            let inlet_states: Vec<LinkState> = slot
                .inlets
                .iter()
                .flatten()
                .map(|link| self.links[link.0].state)
                .collect();
            return if inlet_states.contains(&LinkState::Failed) {
                StageState::Failed
            } else if inlet_states.contains(&LinkState::Cancelled) {
                StageState::Cancelled
            } else {
                StageState::Completed
            };
        }
        if outlet_states.contains(&LinkState::Failed) {
            StageState::Failed
        } else if outlet_states.iter().all(|state| *state == LinkState::Cancelled) {
            StageState::Cancelled
        } else {
            StageState::Completed
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("stages", &self.stages.len())
            .field("links", &self.links.len())
            .field("running", &self.running)
            .finish()
    }
}
