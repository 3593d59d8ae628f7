use thiserror::Error;




/**
 * Reasons the stiff integrator may give up on a sub-step. Each of these is
 * fatal to the run: it means the discretization or its parameters have left
 * the solver's stability region.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrationFailure {
    StepTooSmall { step: f64, min_step: f64 },
    NewtonDiverged { attempts: usize },
    /// The Krylov iteration broke down before reducing the Newton residual
    LinearSolveFailed,
    NonFiniteState,
    Overshoot { reached: f64, target: f64 },
    NoProgress { reached: f64 },
}




/**
 * A failure returned by an integrator, along with the time of the last
 * accepted step. The state handed to the integrator holds the solution at
 * `reached`.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct Interrupted {
    pub reached: f64,
    pub failure: IntegrationFailure,
}




/**
 * Error type for everything that can halt a run: configuration and mesh
 * problems detected before the controller starts, integration failures, and
 * failures of the reporting sink.
 */
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed mesh: {0}")]
    Mesh(String),

    #[error("integration failed at t={time}: {failure}")]
    Integration {
        time: f64,
        failure: IntegrationFailure,
    },

    #[error("reporting sink failed: {0}")]
    Report(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;




// ============================================================================
impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn mesh(message: impl Into<String>) -> Self {
        Self::Mesh(message.into())
    }

    pub fn integration(time: f64, failure: IntegrationFailure) -> Self {
        Self::Integration { time, failure }
    }

    /// Whether the error was raised before any time stepping took place.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Mesh(_) | Self::Json(_))
    }
}

impl std::fmt::Display for IntegrationFailure {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use IntegrationFailure::*;

        match self {
            StepTooSmall { step, min_step } => write!(fmt, "step {:e} below minimum {:e}", step, min_step),
            NewtonDiverged { attempts } => write!(fmt, "newton iteration failed {} times", attempts),
            LinearSolveFailed => write!(fmt, "linear solve made no progress"),
            NonFiniteState => write!(fmt, "non-finite value in state"),
            Overshoot { reached, target } => write!(fmt, "reached {} beyond target {}", reached, target),
            NoProgress { reached } => write!(fmt, "no progress past {}", reached),
        }
    }
}


impl std::fmt::Display for Interrupted {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{} (last accepted t={})", self.failure, self.reached)
    }
}
