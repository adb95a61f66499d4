use eeg_types::ChannelMap;

/// Split acquisition channels into left and right halves.
///
/// Channels are sorted and split at `n / 2`; an odd middle channel lands on the
/// right. With a single channel both regions share it.
pub fn map_channels(channels: &[usize]) -> ChannelMap {
    let mut left = channels.to_vec();
    left.sort_unstable();
    let right = left.split_off(left.len() / 2);

    if left.is_empty() {
        return ChannelMap::new(right.clone(), right);
    }
    ChannelMap::new(left, right)
}
