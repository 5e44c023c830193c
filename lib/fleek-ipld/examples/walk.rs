use fleek_ipld::decoder::{DAG_CBOR, RAW};
use fleek_ipld::walker::{DagScope, MemoryBlockSource, PathOptions};
use fleek_ipld::{Block, DagWalker, GetOptions};
use futures::StreamExt as _;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let source = MemoryBlockSource::new();
    let leaves = ["first", "second", "third"]
        .into_iter()
        .map(|text| Block::encode(RAW, text.as_bytes().to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    let links = leaves.iter().map(|b| Ipld::Link(*b.cid())).collect();
    let root = Block::encode(DAG_CBOR, serde_ipld_dagcbor::to_vec(&Ipld::List(links))?)?;
    source.put(root.clone());
    source.extend(leaves);

    let walker = DagWalker::new(source);
    let mut stream = walker.get([*root.cid()], GetOptions::default());
    while let Some(block) = stream.next().await {
        let block = block?;
        println!("{} ({} bytes)", block.cid(), block.bytes().len());
    }

    let root: Cid = *root.cid();
    let options = PathOptions::builder().dag_scope(DagScope::Block).build();
    let mut stream = walker.get_path(&format!("/ipfs/{root}/1"), options);
    while let Some(block) = stream.next().await {
        println!("path block {}", block?.cid());
    }
    Ok(())
}
