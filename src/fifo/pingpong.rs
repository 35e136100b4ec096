//! Double buffer for engine-local working tiles

/// Two owned buffers and an index that flips after each use.
///
/// Lets an engine fill one buffer while the other is still being handed
/// off. It is engine-local and never shared.
#[derive(Debug, Clone)]
pub struct PingPong<T> {
    buffers: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    pub fn new(ping: T, pong: T) -> Self {
        PingPong {
            buffers: [ping, pong],
            current: 0,
        }
    }

    pub fn from_fn(mut make: impl FnMut() -> T) -> Self {
        let ping = make();
        let pong = make();
        Self::new(ping, pong)
    }

    pub fn current(&self) -> &T {
        &self.buffers[self.current]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.buffers[self.current]
    }

    pub fn next(&self) -> &T {
        &self.buffers[1 - self.current]
    }

    pub fn flip(&mut self) {
        self.current = 1 - self.current;
    }

    /// 0 for ping, 1 for pong
    pub fn index(&self) -> usize {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_alternates() {
        let mut pp = PingPong::new(1, 2);
        assert_eq!(*pp.current(), 1);
        assert_eq!(*pp.next(), 2);
        pp.flip();
        assert_eq!(pp.index(), 1);
        assert_eq!(*pp.current(), 2);
        pp.flip();
        assert_eq!(*pp.current(), 1);
    }

    #[test]
    fn test_from_fn_builds_two() {
        let mut n = 0;
        let mut pp = PingPong::from_fn(|| {
            n += 1;
            vec![n]
        });
        pp.current_mut().push(7);
        assert_eq!(pp.current(), &vec![1, 7]);
        assert_eq!(pp.next(), &vec![2]);
    }
}
