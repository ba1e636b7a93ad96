//! Test data builders for creating fragment trees

use colexec::pipeline::{
    ExchangeMode, Fragment, FragmentId, Operator, ScanFactory, Sink, Source, SyntheticScan,
};

/// Builder for a parallel scan fragment, optionally gathered by a serial root
pub struct PlanBuilder {
    buffers: usize,
    buffer_size: usize,
    scan: Option<ScanFactory>,
    operators: Vec<Operator>,
    gather: Option<ExchangeMode>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            buffers: 4,
            buffer_size: 64,
            scan: None,
            operators: Vec::new(),
            gather: None,
        }
    }

    /// Buffers produced by each scan partition
    pub fn buffers(mut self, buffers: usize) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Replace the synthetic scan
    pub fn scan(mut self, factory: ScanFactory) -> Self {
        self.scan = Some(factory);
        self
    }

    pub fn operator(mut self, operator: Operator) -> Self {
        self.operators.push(operator);
        self
    }

    /// Put a serial exchange root on top of the scan
    pub fn gather(mut self, mode: ExchangeMode) -> Self {
        self.gather = Some(mode);
        self
    }

    pub fn build(self) -> Fragment {
        let factory = self
            .scan
            .unwrap_or_else(|| SyntheticScan::factory(self.buffers, self.buffer_size));
        let mut scan = Fragment::parallel(FragmentId(1)).with_source(Source::scan("scan", factory));
        for op in self.operators {
            scan.add_operator(op);
        }

        match self.gather {
            None => scan.with_sink(Sink::materialize("collect")),
            Some(mode) => Fragment::serial(FragmentId(0))
                .with_source(Source::exchange("gather"))
                .with_sink(Sink::materialize("collect"))
                .with_exchange_mode(mode)
                .with_child(scan.with_sink(Sink::discard("forward"))),
        }
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colexec::FragmentKind;

    #[test]
    fn test_plan_builder() {
        let plan = PlanBuilder::new().gather(ExchangeMode::Shared).build();
        assert_eq!(plan.kind(), FragmentKind::Serial);
        assert_eq!(plan.depth(), 2);
        assert_eq!(plan.exchange_mode(), Some(ExchangeMode::Shared));
    }
}
