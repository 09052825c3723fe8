use rowpipe_error::Result;

use crate::stage::Stage;
use crate::worker::RowIo;

/// Passes every row through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dummy;

impl Dummy {
    pub const KIND: &'static str = "dummy";
}

impl Stage for Dummy {
    fn process_row(&mut self, io: &mut RowIo) -> Result<bool> {
        match io.get_row()? {
            Some(row) => {
                io.put_row(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
