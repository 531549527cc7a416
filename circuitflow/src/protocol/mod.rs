//! Typed envelopes carried between the pipeline and the isolated worker.

mod message;

pub use message::{
    CompileInput, ComputeWitnessInput, ErrorCode, ExportVerifierInput, Failure,
    GenerateProofInput, Operation, Outcome, Request, RequestId, Response, SetupInput,
    VerifyInput,
};
