use super::*;
use mockall::Sequence;
use std::io::Cursor;

// hands out at most `chunk` bytes per read, like a slow tty
struct Trickle {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn weights_from<R: Read>(mut serial: WeightSerial<R>) -> Vec<f64> {
    let mut out = vec![];
    while let Some(w) = serial.next_weight().unwrap() {
        out.push(w);
    }
    out
}

#[test]
fn reads_one_weight_per_line() {
    let input = "Weight: 1001.0 g\r\nWeight: 1002.5 g\r\nWeight: 998 g\r\n";
    let serial = WeightSerial::from_reader(Cursor::new(input));

    assert_eq!(weights_from(serial), vec![1001.0, 1002.5, 998.0]);
}

#[test]
fn skips_lines_without_weight() {
    let input = "booting\nWeight: 5 g\n\ntare done\nWeight: 6 g\n";
    let serial = WeightSerial::from_reader(Cursor::new(input));

    assert_eq!(weights_from(serial), vec![5.0, 6.0]);
}

#[test]
fn clamps_negative_weights() {
    let input = "Weight: -0.4 g\nWeight: 3 g\n";
    let serial = WeightSerial::from_reader(Cursor::new(input));

    assert_eq!(weights_from(serial), vec![0.0, 3.0]);
}

#[test]
fn frames_lines_across_small_reads() {
    let trickle = Trickle {
        data: b"Weight: 12.5 g\nWeight: 13.5 g\nWeight: 14".to_vec(),
        pos: 0,
        chunk: 3,
    };
    let serial = WeightSerial::from_reader(trickle);

    // the trailing line never gets its unit, so it is skipped at eof
    assert_eq!(weights_from(serial), vec![12.5, 13.5]);
}

#[test]
fn parses_unterminated_last_line() {
    let serial = WeightSerial::from_reader(Cursor::new("Weight: 7 g"));

    assert_eq!(weights_from(serial), vec![7.0]);
}

#[test]
fn drops_overlong_garbage() {
    let mut input = vec![b'x'; MAX_LINE * 2];
    input.extend_from_slice(b"\nWeight: 9 g\n");
    let serial = WeightSerial::from_reader(Cursor::new(input));

    assert_eq!(weights_from(serial), vec![9.0]);
}

#[test]
fn survives_invalid_utf8() {
    let mut input = vec![0xff, 0xfe, b'\n'];
    input.extend_from_slice(b"Weight: 4 g\n");
    let serial = WeightSerial::from_reader(Cursor::new(input));

    assert_eq!(weights_from(serial), vec![4.0]);
}

#[test]
fn open_reports_missing_device() {
    let r = WeightSerial::open(Path::new("/nonexistent/ttyACM9"));

    assert!(matches!(r, Err(SerialError::Open { .. })));
}

#[test]
fn correct_weight_keeps_positive_values() {
    assert_eq!(correct_weight(12.0), 12.0);
    assert_eq!(correct_weight(0.0), 0.0);
    assert_eq!(correct_weight(-12.0), 0.0);
}

#[test]
fn pump_forwards_until_source_ends() {
    let mut source = MockWeightSource::new();
    let mut seq = Sequence::new();
    source.expect_next_weight().times(1).in_sequence(&mut seq).returning(|| Ok(Some(1.0)));
    source.expect_next_weight().times(1).in_sequence(&mut seq).returning(|| Ok(None));

    let (tx, mut rx) = mpsc::channel(1);
    let outcome = pump(&mut source, &tx, Duration::ZERO);

    assert_eq!(outcome, PumpOutcome::SourceEnded);
    assert_eq!(rx.try_recv().unwrap(), 1.0);
}

#[test]
fn pump_drops_newest_when_slot_is_full() {
    let mut source = MockWeightSource::new();
    let mut seq = Sequence::new();
    for w in [1.0, 2.0, 3.0] {
        source
            .expect_next_weight()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || Ok(Some(w)));
    }
    source.expect_next_weight().times(1).in_sequence(&mut seq).returning(|| Ok(None));

    let (tx, mut rx) = mpsc::channel(1);
    pump(&mut source, &tx, Duration::ZERO);

    assert_eq!(rx.try_recv().unwrap(), 1.0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn pump_continues_after_read_errors() {
    let mut source = MockWeightSource::new();
    let mut seq = Sequence::new();
    source
        .expect_next_weight()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Err(SerialError::Read(io::Error::new(io::ErrorKind::Other, "framing"))));
    source.expect_next_weight().times(1).in_sequence(&mut seq).returning(|| Ok(Some(5.0)));
    source.expect_next_weight().times(1).in_sequence(&mut seq).returning(|| Ok(None));

    let (tx, mut rx) = mpsc::channel(1);
    let outcome = pump(&mut source, &tx, Duration::ZERO);

    assert_eq!(outcome, PumpOutcome::SourceEnded);
    assert_eq!(rx.try_recv().unwrap(), 5.0);
}

#[test]
fn pump_stops_when_receiver_is_gone() {
    let mut source = MockWeightSource::new();
    source.expect_next_weight().never();

    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    assert_eq!(pump(&mut source, &tx, Duration::ZERO), PumpOutcome::ReceiverClosed);
}

#[test]
fn pump_stops_when_receiver_closes_mid_stream() {
    let (tx, rx) = mpsc::channel(1);
    let mut rx = Some(rx);

    let mut source = MockWeightSource::new();
    source.expect_next_weight().times(1).returning(move || {
        // receiver goes away while a reading is in flight
        drop(rx.take());
        Ok(Some(1.0))
    });

    assert_eq!(pump(&mut source, &tx, Duration::ZERO), PumpOutcome::ReceiverClosed);
}

#[test]
fn leading_partial_line_is_skipped() {
    // opened mid-line: the tail of an old reading carries no tag and can't be misread
    let serial = WeightSerial::from_reader(Cursor::new("02.5 g\r\nWeight: 7 g\r\n"));

    assert_eq!(weights_from(serial), vec![7.0]);
}

const RECONNECT: Duration = Duration::from_millis(10);

fn spawn_sampling(path: &Path) -> (thread::JoinHandle<()>, mpsc::Receiver<f64>) {
    let port = WeightSerial::open(path).unwrap();
    let (tx, rx) = mpsc::channel(1);
    let path = path.to_path_buf();
    let handle = thread::spawn(move || sampling_context(path, port, tx, RECONNECT));
    (handle, rx)
}

#[test]
fn sampling_reopens_device_after_eof() {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("ttyACM0");
    std::fs::write(&device, "Weight: 5 g\n").unwrap();

    let (handle, mut rx) = spawn_sampling(&device);

    // the file holds a single reading, so each further one needs a reopen
    let got: Vec<f64> = (0..3).map(|_| rx.blocking_recv().unwrap()).collect();
    assert_eq!(got, vec![5.0, 5.0, 5.0]);

    drop(rx);
    handle.join().unwrap();
}

#[test]
fn sampling_retries_until_device_returns() {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("ttyACM0");
    std::fs::write(&device, "Weight: 5 g\n").unwrap();

    let (handle, mut rx) = spawn_sampling(&device);
    assert_eq!(rx.blocking_recv().unwrap(), 5.0);

    std::fs::remove_file(&device).unwrap();
    // several reopen attempts fail while the device is gone
    thread::sleep(RECONNECT * 5);
    std::fs::write(&device, "Weight: 6 g\n").unwrap();

    // readings already in flight before the removal may still arrive
    let next = loop {
        let w = rx.blocking_recv().unwrap();
        if w != 5.0 {
            break w;
        }
    };
    assert_eq!(next, 6.0);

    drop(rx);
    handle.join().unwrap();
}

#[test]
fn sampling_stops_while_device_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("ttyACM0");
    std::fs::write(&device, "Weight: 5 g\n").unwrap();

    let (handle, mut rx) = spawn_sampling(&device);
    assert_eq!(rx.blocking_recv().unwrap(), 5.0);

    std::fs::remove_file(&device).unwrap();
    thread::sleep(RECONNECT * 3);
    drop(rx);

    // the reopen loop notices the closed channel and returns
    handle.join().unwrap();
}
