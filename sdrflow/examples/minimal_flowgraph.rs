use sdrflow::{
    blocks::basic::{Head, NullSink, NullSource},
    prelude::*,
};

fn main() -> Result<()> {
    let head_elements = 100_000_000;

    let mut fg = Flowgraph::new();

    let source = fg.add_block(NullSource::<f32>::new());
    let head = fg.add_block(Head::<f32>::new(head_elements));
    let sink = fg.add_block(NullSink::<f32>::new());

    fg.connect(source, head)?;
    fg.connect(head, sink)?;

    println!("running flowgraph...");
    let report = Runtime::with_config(RuntimeConfig::from_env()?).run(fg)?;
    println!("flowgraph finished in {:?}", report.elapsed);

    Ok(())
}
