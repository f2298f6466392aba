use thiserror::Error;

use crate::model::{AntiForgetError, ProgressError, StudentError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Student(#[from] StudentError),
    #[error(transparent)]
    AntiForget(#[from] AntiForgetError),
}
