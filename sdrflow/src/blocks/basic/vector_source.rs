use crate::{Tag, prelude::*};

/// Produces the items of a vector, optionally repeating them forever.
///
/// Tags given with [`with_tags`](VectorSource::with_tags) have offsets
/// relative to the start of the vector, and are emitted on every repetition.
#[derive(Debug)]
pub struct VectorSource<T> {
    data: Vec<T>,
    tags: Vec<Tag>,
    repeat: bool,
    position: usize,
}

impl<T: Item> VectorSource<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data,
            tags: Vec::new(),
            repeat: false,
            position: 0,
        }
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }
}

impl<T: Item> Block for VectorSource<T> {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "vector_source",
            IoSignature::empty(),
            IoSignature::exactly::<T>(1),
        )
    }

    fn start(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        if self.data.is_empty() {
            return Ok(DoneWithoutOutput);
        }
        let output = &mut io.outputs[0];
        let items = output.items_mut::<T>();
        let mut produced = 0;
        let mut tags = Vec::new();
        while produced < items.len() {
            if self.position == self.data.len() {
                if !self.repeat {
                    break;
                }
                self.position = 0;
            }
            let start = self.position;
            let n = (items.len() - produced).min(self.data.len() - start);
            items[produced..produced + n].copy_from_slice(&self.data[start..start + n]);
            tags.extend(
                self.tags
                    .iter()
                    .filter(|tag| (start as u64..(start + n) as u64).contains(&tag.offset))
                    .map(|tag| (produced + tag.offset as usize - start, tag)),
            );
            produced += n;
            self.position += n;
        }
        for (index, tag) in tags {
            output.add_tag(index, tag.key.clone(), tag.value.clone());
        }
        output.produce(produced);

        if !self.repeat && self.position == self.data.len() {
            Ok(DoneWithOutput)
        } else {
            Ok(Run)
        }
    }
}
