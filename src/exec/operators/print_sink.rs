// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Sink that prints rows as text, one line per row.

use std::io::{self, Write};

use arrow::util::display::{ArrayFormatter, FormatOptions};

use crate::common::error::Result;
use crate::exec::chunk::{Chunk, Header};
use crate::exec::pipeline::operator::{Operator, SinkOperator};
use crate::runtime::runtime_state::RuntimeState;

/// Writes `prefix` followed by the tab-separated values of each row.
pub struct PrintSink {
    header: Header,
    prefix: String,
    writer: Box<dyn Write + Send>,
    rows_written: u64,
}

impl PrintSink {
    pub fn new(header: Header, prefix: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            header,
            prefix: prefix.into(),
            writer,
            rows_written: 0,
        }
    }

    pub fn stdout(header: Header, prefix: impl Into<String>) -> Self {
        Self::new(header, prefix, Box::new(io::stdout()))
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl Operator for PrintSink {
    fn name(&self) -> &str {
        "PrintSink"
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl SinkOperator for PrintSink {
    fn input_header(&self) -> &Header {
        &self.header
    }

    fn consume(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<()> {
        let options = FormatOptions::default().with_null("NULL");
        let formatters = chunk
            .columns()
            .iter()
            .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut line = String::new();
        for row in 0..chunk.len() {
            line.clear();
            line.push_str(&self.prefix);
            for (idx, formatter) in formatters.iter().enumerate() {
                if idx > 0 {
                    line.push('\t');
                }
                line.push_str(&formatter.value(row).to_string());
            }
            line.push('\n');
            self.writer.write_all(line.as_bytes())?;
        }
        self.rows_written += chunk.len() as u64;
        Ok(())
    }

    fn on_finish(&mut self, _state: &RuntimeState) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn prints_prefixed_tab_separated_rows() {
        let header: Header = Arc::new(Schema::new(vec![
            Field::new("n", DataType::Int64, true),
            Field::new("s", DataType::Utf8, true),
        ]));
        let chunk = Chunk::try_new(
            Arc::clone(&header),
            vec![
                Arc::new(Int64Array::from(vec![Some(1), None])),
                Arc::new(StringArray::from(vec![Some("a"), Some("b")])),
            ],
            2,
        )
        .unwrap();
        let buf = SharedBuf::default();
        let mut sink = PrintSink::new(header, "> ", Box::new(buf.clone()));
        let state = RuntimeState::default();
        sink.consume(&state, chunk).unwrap();
        sink.on_finish(&state).unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "> 1\ta\n> NULL\tb\n");
        assert_eq!(sink.rows_written(), 2);
    }
}
