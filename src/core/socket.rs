use super::buffer::{DataType, Element, SocketBuffer};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Direction of a socket relative to its task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
    /// Pass-through: read and updated in place, then exposed downstream
    Fwd,
}

impl Direction {
    pub fn is_input(&self) -> bool {
        matches!(self, Self::In | Self::Fwd)
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Self::Out | Self::Fwd)
    }
}

/// Index of a socket inside its task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SocketId(pub usize);

/// Typed data port of a task.
///
/// The buffer holds `n_frames * n_elmts` elements, frame `f` living at
/// `[f * n_elmts, (f + 1) * n_elmts)`. The buffer can be swapped for external
/// storage of the same shape but never resized by a bind.
#[derive(Debug, Clone)]
pub struct Socket {
    name: String,
    direction: Direction,
    datatype: DataType,
    n_elmts: usize,
    n_frames: usize,
    buffer: Option<SocketBuffer>,
}

impl Socket {
    pub(crate) fn new(
        name: impl Into<String>,
        direction: Direction,
        datatype: DataType,
        n_elmts: usize,
        n_frames: usize,
    ) -> Result<Self> {
        let name = name.into();
        if n_elmts == 0 {
            return Err(Error::config(
                &name,
                "'n_elmts' has to be greater than 0 for a socket",
            ));
        }
        Ok(Self {
            buffer: Some(SocketBuffer::zeroed(datatype, n_elmts * n_frames)),
            name,
            direction,
            datatype,
            n_elmts,
            n_frames,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    /// Elements per frame
    pub fn n_elmts(&self) -> usize {
        self.n_elmts
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Total number of elements the bound buffer must hold
    pub fn capacity(&self) -> usize {
        self.n_elmts * self.n_frames
    }

    pub fn is_bound(&self) -> bool {
        self.buffer.is_some()
    }

    /// Replace the storage with external data of identical shape.
    /// Returns the previous buffer, if any.
    pub fn bind(&mut self, buffer: SocketBuffer) -> Result<Option<SocketBuffer>> {
        if buffer.datatype() != self.datatype {
            return Err(Error::config(
                &self.name,
                format!(
                    "cannot bind a {} buffer to a {} socket",
                    buffer.datatype(),
                    self.datatype
                ),
            ));
        }
        if buffer.len() != self.capacity() {
            return Err(Error::config(
                &self.name,
                format!(
                    "bound buffer length has to be equal to n_elmts * n_frames ({} != {})",
                    buffer.len(),
                    self.capacity()
                ),
            ));
        }
        Ok(self.buffer.replace(buffer))
    }

    /// Detach and return the storage; the socket is unbound afterwards
    pub fn unbind(&mut self) -> Option<SocketBuffer> {
        self.buffer.take()
    }

    pub fn buffer(&self) -> Result<&SocketBuffer> {
        self.buffer
            .as_ref()
            .ok_or_else(|| Error::state(&self.name, "socket is not bound to any buffer"))
    }

    pub fn buffer_mut(&mut self) -> Result<&mut SocketBuffer> {
        let name = &self.name;
        self.buffer
            .as_mut()
            .ok_or_else(|| Error::state(name, "socket is not bound to any buffer"))
    }

    pub fn data<T: Element>(&self) -> Result<&[T]> {
        T::slice(self.buffer()?).ok_or_else(|| self.type_error::<T>())
    }

    pub fn data_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        if T::DATATYPE != self.datatype {
            return Err(self.type_error::<T>());
        }
        let name = &self.name;
        self.buffer
            .as_mut()
            .and_then(T::slice_mut)
            .ok_or_else(|| Error::state(name, "socket is not bound to any buffer"))
    }

    /// Elements of frames `[first, first + count)`
    pub fn frames<T: Element>(&self, first: usize, count: usize) -> Result<&[T]> {
        let (start, end) = self.window(first, count)?;
        Ok(&self.data::<T>()?[start..end])
    }

    pub fn frames_mut<T: Element>(&mut self, first: usize, count: usize) -> Result<&mut [T]> {
        let (start, end) = self.window(first, count)?;
        Ok(&mut self.data_mut::<T>()?[start..end])
    }

    /// Elements of a single frame
    pub fn frame<T: Element>(&self, frame: usize) -> Result<&[T]> {
        self.frames(frame, 1)
    }

    pub fn frame_mut<T: Element>(&mut self, frame: usize) -> Result<&mut [T]> {
        self.frames_mut(frame, 1)
    }

    /// Copy of the frames `[first, first + count)` as a standalone buffer
    pub fn copy_frames(&self, first: usize, count: usize) -> Result<SocketBuffer> {
        let (start, end) = self.window(first, count)?;
        self.buffer()?
            .copy_window(start, end - start)
            .ok_or_else(|| Error::state(&self.name, "frame window exceeds the bound buffer"))
    }

    /// Overwrite the frames starting at `first` with `window`
    pub fn write_frames(&mut self, first: usize, window: &SocketBuffer) -> Result<()> {
        if window.len() % self.n_elmts != 0 {
            return Err(Error::config(
                &self.name,
                format!(
                    "window length {} is not a multiple of n_elmts ({})",
                    window.len(),
                    self.n_elmts
                ),
            ));
        }
        let (start, _) = self.window(first, window.len() / self.n_elmts)?;
        let datatype = self.datatype;
        if !self.buffer_mut()?.write_window(start, window) {
            return Err(Error::config(
                &self.name,
                format!(
                    "cannot write a {} window into a {} socket",
                    window.datatype(),
                    datatype
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn set_n_frames(&mut self, n_frames: usize) {
        self.n_frames = n_frames;
        let capacity = self.capacity();
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.resize(capacity);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.buffer = Some(SocketBuffer::zeroed(self.datatype, self.capacity()));
    }

    fn window(&self, first: usize, count: usize) -> Result<(usize, usize)> {
        if first + count > self.n_frames {
            return Err(Error::state(
                &self.name,
                format!(
                    "frames [{}, {}) are out of range (n_frames = {})",
                    first,
                    first + count,
                    self.n_frames
                ),
            ));
        }
        Ok((first * self.n_elmts, (first + count) * self.n_elmts))
    }

    fn type_error<T: Element>(&self) -> Error {
        Error::state(
            &self.name,
            format!(
                "socket holds {} elements, accessed as {}",
                self.datatype,
                T::DATATYPE
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_sized_socket_is_rejected() {
        let err = Socket::new("out", Direction::Out, DataType::F32, 0, 1).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_frame_windows() {
        let mut socket = Socket::new("out", Direction::Out, DataType::I32, 2, 3).unwrap();
        socket.frame_mut::<i32>(1).unwrap().copy_from_slice(&[7, 8]);
        assert_eq!(socket.data::<i32>().unwrap(), &[0, 0, 7, 8, 0, 0]);
        assert_eq!(socket.frames::<i32>(1, 2).unwrap(), &[7, 8, 0, 0]);
        assert!(socket.frame::<i32>(3).unwrap_err().is_state());
        assert!(socket.frame::<f32>(0).unwrap_err().is_state());
    }

    #[test]
    fn test_bind_checks_shape() {
        let mut socket = Socket::new("in", Direction::In, DataType::U8, 4, 1).unwrap();
        assert!(socket.bind(u8::into_buffer(vec![1, 2, 3])).unwrap_err().is_config());
        assert!(socket.bind(i8::into_buffer(vec![1, 2, 3, 4])).unwrap_err().is_config());

        let previous = socket.bind(u8::into_buffer(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(previous, Some(SocketBuffer::zeroed(DataType::U8, 4)));
        assert_eq!(socket.data::<u8>().unwrap(), &[1, 2, 3, 4]);

        let detached = socket.unbind().unwrap();
        assert_eq!(u8::from_buffer(detached).unwrap(), vec![1, 2, 3, 4]);
        assert!(!socket.is_bound());
        assert!(socket.data::<u8>().unwrap_err().is_state());
    }

    #[test]
    fn test_copy_and_write_frames() {
        let mut a = Socket::new("a", Direction::Out, DataType::F64, 2, 2).unwrap();
        a.data_mut::<f64>().unwrap().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let window = a.copy_frames(1, 1).unwrap();

        let mut b = Socket::new("b", Direction::In, DataType::F64, 2, 2).unwrap();
        b.write_frames(0, &window).unwrap();
        assert_eq!(b.data::<f64>().unwrap(), &[3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_set_n_frames_keeps_existing_frames() {
        let mut socket = Socket::new("out", Direction::Out, DataType::I16, 2, 1).unwrap();
        socket.frame_mut::<i16>(0).unwrap().copy_from_slice(&[5, 6]);
        socket.set_n_frames(3);
        assert_eq!(socket.data::<i16>().unwrap(), &[5, 6, 0, 0, 0, 0]);
    }
}
